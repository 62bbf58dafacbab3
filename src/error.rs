//! Error types for the varex engine

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error at line {line}, column {column}: {message}")]
    Parse { line: usize, column: usize, message: String },

    #[error("Unknown variable '{name}'")]
    UnknownVariable { name: String },

    #[error("Evaluation error: {message}")]
    Evaluation { message: String },

    #[error("Integration {namespace}.{operation} failed: {message}")]
    Integration { namespace: String, operation: String, message: String },

    #[error("Unknown scope '{scope}'")]
    UnknownScope { scope: String },

    #[error("Invalid definition for '{name}': {message}")]
    Definition { name: String, message: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },
}

pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn parse(line: usize, column: usize, message: impl Into<String>) -> Self {
        Self::Parse {
            line,
            column,
            message: message.into(),
        }
    }

    pub fn unknown_variable(name: impl Into<String>) -> Self {
        Self::UnknownVariable { name: name.into() }
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::Evaluation {
            message: message.into(),
        }
    }

    pub fn integration(
        namespace: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Integration {
            namespace: namespace.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn unknown_scope(scope: impl ToString) -> Self {
        Self::UnknownScope {
            scope: scope.to_string(),
        }
    }

    pub fn definition(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Definition {
            name: name.into(),
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    /// True for failures that abort a command script but leave the rest of
    /// the page untouched.
    pub fn is_unknown_variable(&self) -> bool {
        matches!(self, Self::UnknownVariable { .. })
    }
}
