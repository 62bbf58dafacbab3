//! Sheet documents
//!
//! A sheet declares the global variables, the pages with their variables,
//! commands and labels, and any lookup-table integrations. Documents are
//! TOML or JSON, picked by file extension:
//!
//! ```toml
//! variables = [
//!     { name = "level", value = 3 },
//!     { name = "proficiency", expression = "2 + floor((level - 1) / 4)" },
//! ]
//!
//! [pages.combat]
//! variables = [{ name = "hp", value = 10, min = 0, max = 50 }]
//! commands = { heal = "addValue('hp', 5)" }
//! labels = { status = "HP: {hp}" }
//!
//! [integrations.Sheet]
//! async = true
//! values = { strength = 14 }
//! ```

use crate::error::{EngineError, Result};
use crate::integration::{table_integration, Integration};
use crate::store::{VariableDefinition, VariableSet};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Toml,
    Json,
}

impl DocumentFormat {
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        match path.as_ref().extension().and_then(|e| e.to_str()) {
            Some("toml") => Ok(DocumentFormat::Toml),
            Some("json") => Ok(DocumentFormat::Json),
            _ => Err(EngineError::InvalidFormat {
                message: format!(
                    "Sheet file must be .toml or .json: {}",
                    path.as_ref().display()
                ),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expression: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl VariableSpec {
    pub fn to_definition(&self) -> Result<VariableDefinition> {
        let definition = match (&self.value, &self.expression) {
            (Some(value), None) => VariableDefinition::literal(&*self.name, value.clone()),
            (None, Some(expression)) => VariableDefinition::expression(&*self.name, expression.as_str()),
            (Some(_), Some(_)) => {
                return Err(EngineError::definition(
                    &self.name,
                    "declares both a value and an expression",
                ))
            }
            (None, None) => {
                return Err(EngineError::definition(
                    &self.name,
                    "needs either a value or an expression",
                ))
            }
        };
        Ok(definition.with_bounds(self.min, self.max))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSpec {
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub commands: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableIntegrationSpec {
    #[serde(rename = "async", default)]
    pub is_async: bool,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SheetDocument {
    #[serde(default)]
    pub variables: Vec<VariableSpec>,
    #[serde(default)]
    pub pages: BTreeMap<String, PageSpec>,
    #[serde(default)]
    pub integrations: BTreeMap<String, TableIntegrationSpec>,
}

impl SheetDocument {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let format = DocumentFormat::from_path(path)?;
        if !path.exists() {
            return Err(EngineError::FileNotFound {
                path: path.display().to_string(),
            });
        }
        let content = fs::read_to_string(path)?;
        log::info!("Loading sheet {}", path.display());
        Self::parse(&content, format)
    }

    pub fn parse(content: &str, format: DocumentFormat) -> Result<Self> {
        match format {
            DocumentFormat::Toml => toml::from_str(content).map_err(|e| EngineError::InvalidFormat {
                message: format!("Invalid TOML sheet: {}", e),
            }),
            DocumentFormat::Json => serde_json::from_str(content).map_err(|e| EngineError::InvalidFormat {
                message: format!("Invalid JSON sheet: {}", e),
            }),
        }
    }

    pub fn global_definitions(&self) -> Result<VariableSet> {
        definitions_from(&self.variables)
    }

    pub fn page_definitions(&self, page: &str) -> Result<VariableSet> {
        let spec = self
            .pages
            .get(page)
            .ok_or_else(|| EngineError::unknown_scope(format!("page '{}'", page)))?;
        definitions_from(&spec.variables)
    }

    /// Table integrations declared by the document.
    pub fn build_integrations(&self) -> Vec<Integration> {
        self.integrations
            .iter()
            .map(|(name, spec)| table_integration(name.as_str(), spec.is_async, spec.values.clone()))
            .collect()
    }

    /// Every variable expression and command script in the document, keyed
    /// by a location for reporting.
    pub fn expressions(&self) -> Vec<(String, &str)> {
        let mut found = Vec::new();
        for spec in &self.variables {
            if let Some(expression) = &spec.expression {
                found.push((spec.name.clone(), expression.as_str()));
            }
        }
        for (page, spec) in &self.pages {
            for variable in &spec.variables {
                if let Some(expression) = &variable.expression {
                    found.push((format!("{}.{}", page, variable.name), expression.as_str()));
                }
            }
            for (name, script) in &spec.commands {
                found.push((format!("{}.commands.{}", page, name), script.as_str()));
            }
        }
        found
    }
}

fn definitions_from(specs: &[VariableSpec]) -> Result<VariableSet> {
    let mut set = VariableSet::new();
    for spec in specs {
        set.insert(spec.to_definition()?)?;
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const SHEET: &str = r#"
variables = [
    { name = "level", value = 3 },
    { name = "proficiency", expression = "2 + floor((level - 1) / 4)" },
]

[pages.combat]
variables = [{ name = "hp", value = 10, min = 0, max = 50 }]
commands = { heal = "addValue('hp', 5)" }
labels = { status = "HP: {hp}" }

[integrations.Sheet]
async = true
values = { strength = 14 }
"#;

    #[test]
    fn test_parse_toml_sheet() {
        let doc = SheetDocument::parse(SHEET, DocumentFormat::Toml).unwrap();
        let globals = doc.global_definitions().unwrap();
        assert_eq!(globals.names().collect::<Vec<_>>(), vec!["level", "proficiency"]);

        let page = doc.page_definitions("combat").unwrap();
        let hp = page.get("hp").unwrap();
        assert_eq!(hp.max, Some(50.0));
        assert_eq!(doc.pages["combat"].commands["heal"], "addValue('hp', 5)");

        let integrations = doc.build_integrations();
        assert_eq!(integrations.len(), 1);
        assert!(integrations[0].operation("get").unwrap().is_async);
        assert_eq!(doc.expressions().len(), 2);
    }

    #[test]
    fn test_load_json_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"variables": [{{"name": "a", "value": [1, "x"]}}, {{"name": "b", "expression": "a.length"}}]}}"#
        )
        .unwrap();

        let doc = SheetDocument::load(file.path()).unwrap();
        assert_eq!(
            doc.variables[0].value,
            Some(Value::Array(vec![Value::Number(1.0), Value::from("x")]))
        );
        assert!(doc.pages.is_empty());
    }

    #[test]
    fn test_rejects_bad_specs() {
        let both = r#"variables = [{ name = "a", value = 1, expression = "2" }]"#;
        let doc = SheetDocument::parse(both, DocumentFormat::Toml).unwrap();
        assert!(matches!(doc.global_definitions(), Err(EngineError::Definition { .. })));

        let neither = r#"variables = [{ name = "a" }]"#;
        let doc = SheetDocument::parse(neither, DocumentFormat::Toml).unwrap();
        assert!(doc.global_definitions().is_err());

        assert!(matches!(
            DocumentFormat::from_path("sheet.yaml"),
            Err(EngineError::InvalidFormat { .. })
        ));
        assert!(matches!(
            SheetDocument::load("missing.toml"),
            Err(EngineError::FileNotFound { .. })
        ));
        assert!(matches!(
            SheetDocument::page_definitions(&SheetDocument::default(), "nope"),
            Err(EngineError::UnknownScope { .. })
        ));
    }
}
