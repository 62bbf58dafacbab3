// FILE: src/cli/config.rs

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fs;

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    pub state_file: Option<String>,
    pub default_page: Option<String>,
    pub format: Option<String>,
}

pub fn load(config_path: &str) -> Result<ConfigFile> {
    let config_content = fs::read_to_string(config_path).map_err(|e| EngineError::FileNotFound {
        path: format!("Settings file {}: {}", config_path, e),
    })?;
    log::info!("Loaded settings from {}", config_path);

    if config_path.ends_with(".json") {
        serde_json::from_str(&config_content).map_err(|e| EngineError::InvalidFormat {
            message: format!("Invalid JSON settings: {}", e),
        })
    } else if config_path.ends_with(".toml") {
        toml::from_str(&config_content).map_err(|e| EngineError::InvalidFormat {
            message: format!("Invalid TOML settings: {}", e),
        })
    } else {
        Err(EngineError::InvalidFormat {
            message: "Settings file must be .json or .toml format".to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_load_settings() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("varex.toml");
        fs::write(&path, "state_file = \"state.json\"\ndefault_page = \"combat\"\n").unwrap();

        let config = load(path.to_str().unwrap()).unwrap();
        assert_eq!(config.state_file.as_deref(), Some("state.json"));
        assert_eq!(config.default_page.as_deref(), Some("combat"));
        assert!(config.format.is_none());

        let bad = temp_dir.path().join("varex.yaml");
        fs::write(&bad, "format: json").unwrap();
        assert!(load(bad.to_str().unwrap()).is_err());
    }
}
