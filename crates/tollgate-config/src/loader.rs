//! Configuration file loading and error types.

use std::{fs, path::Path};

use crate::ControlConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("yaml: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("toml: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unsupported config format")]
    UnsupportedFormat,
    #[error("validation: {0}")]
    Validation(String),
}

pub fn load_config(path: impl AsRef<Path>) -> Result<ControlConfig, ConfigError> {
    let path = path.as_ref();
    let data = fs::read_to_string(path)?;
    match path.extension().and_then(|s| s.to_str()).unwrap_or("") {
        "json" | "jsonc" => {
            let stripped = json_comments::StripComments::new(data.as_bytes());
            Ok(serde_json::from_reader(stripped)?)
        }
        "yaml" | "yml" => Ok(serde_yaml::from_str(&data)?),
        "toml" => Ok(toml::from_str(&data)?),
        _ => Err(ConfigError::UnsupportedFormat),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_temp(name: &str, contents: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!("tollgate-cfg-{}-{name}", std::process::id()));
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_load_toml() {
        let path = write_temp("a.toml", "[store]\nurl = \"sqlite:control.db\"\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.store.url, "sqlite:control.db");
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_jsonc_with_comments() {
        let path = write_temp(
            "b.jsonc",
            r#"{
                // control store
                "store": { "url": "sqlite:control.db" }
            }"#,
        );
        let config = load_config(&path).unwrap();
        assert_eq!(config.store.url, "sqlite:control.db");
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_load_yaml() {
        let path = write_temp("c.yaml", "store:\n  url: sqlite:control.db\n");
        let config = load_config(&path).unwrap();
        assert_eq!(config.store.url, "sqlite:control.db");
        fs::remove_file(path).ok();
    }

    #[test]
    fn test_unsupported_extension() {
        let path = write_temp("d.ini", "whatever");
        assert!(matches!(
            load_config(&path),
            Err(ConfigError::UnsupportedFormat)
        ));
        fs::remove_file(path).ok();
    }
}
