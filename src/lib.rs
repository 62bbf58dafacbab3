//! Variable Expression & Dependency Resolution Engine
//!
//! Named variables hold either a literal value or an expression that may
//! read other variables, call a fixed math library, and invoke host
//! integrations whose operations can be immediate or deferred.
//!
//! # Features
//!
//! - Dependency graph built by scanning expression text
//! - Deterministic topological ordering; cycles are broken by dropping an edge
//! - Automatic await sequencing of deferred integration calls
//! - Command scripts with `setValue` / `addValue` (clamped, persisted)
//! - Selective change propagation after each command
//! - Sheet documents in TOML or JSON with pages, commands and labels
//!
//! # Basic Usage
//!
//! ```rust,no_run
//! use varex::{Engine, ScopeId, Value, VariableDefinition, Result};
//!
//! async fn run() -> Result<()> {
//!     let mut engine = Engine::new();
//!     engine.define(ScopeId::Global, VariableDefinition::literal("hp", 10.0).with_bounds(Some(0.0), Some(50.0)))?;
//!     engine.define(ScopeId::Global, VariableDefinition::expression("max_hp", "this.hp * 2"))?;
//!     engine.load_scope(&ScopeId::Global).await?;
//!
//!     let outcome = engine.run_command(&ScopeId::Global, "addValue('hp', 5)").await?;
//!     assert!(outcome.is_ok());
//!     assert_eq!(engine.value(&ScopeId::Global, "max_hp"), Some(&Value::Number(30.0)));
//!     Ok(())
//! }
//! ```
//!
//! # Resolution Pipeline
//!
//! 1. **Graph**: scan each expression for the variables and integration
//!    namespaces it references
//! 2. **Schedule**: depth-first topological order in declaration order
//! 3. **Evaluate**: expand placeholders, sequence awaits, parse and run
//! 4. **Commands**: run a script, then re-evaluate everything downstream of
//!    what it changed

pub mod error;
pub mod value;
pub mod store;
pub mod utils;

pub mod lexer;
pub mod ast;
pub mod parser;

pub mod math;
pub mod integration;
pub mod sequencer;
pub mod template;
pub mod evaluator;

pub mod graph;
pub mod scheduler;
pub mod resolver;
pub mod hooks;
pub mod command;
pub mod propagation;
pub mod persistence;

pub mod document;
pub mod engine;
pub mod cli;

// Re-export commonly used types
pub use error::{EngineError, Result};
pub use value::Value;
pub use store::{DefinitionKind, ResolvedScope, ScopeId, VariableDefinition, VariableSet};
pub use utils::is_valid_identifier;
pub use lexer::{Lexer, Token, TokenType};
pub use parser::{parse_expression, parse_program, Parser};
pub use integration::{table_integration, Integration, IntegrationSet, Operation};
pub use sequencer::{AwaitSequencer, SequencingMode};
pub use template::{PlaceholderExpander, PlaceholderMode};
pub use evaluator::{EvalContext, Evaluator, MutationPrimitives, Runtime};
pub use graph::DependencyGraph;
pub use scheduler::{BrokenEdge, Schedule};
pub use resolver::{Diagnostic, Resolution, Resolver};
pub use hooks::RenderHooks;
pub use command::{CommandExecutor, CommandRun};
pub use persistence::{JsonFileStore, MemoryStore, NullStore, PersistenceStore};
pub use document::{DocumentFormat, SheetDocument};
pub use engine::{CommandOutcome, Engine, ScopeState};
pub use cli::VarexCli;

/// Engine version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
