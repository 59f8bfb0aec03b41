use crate::models::settings::Settings;
use std::env;

/// Loads settings from the file named by `TRELLIS_CONFIG_PATH`, defaulting
/// to `./config.json`.
pub fn load_settings() -> Result<Settings, Box<dyn std::error::Error>> {
    let path = env::var("TRELLIS_CONFIG_PATH").unwrap_or_else(|_| "config.json".to_string());
    load_settings_from_path(&path)
}

/// Loads settings from an explicit path.
pub fn load_settings_from_path(path: &str) -> Result<Settings, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let settings: Settings = serde_json::from_str(&content)?;
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_minimal_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"version": 1, "routes": "r: * -> <shunt>;", "timeout_secs": 5}"#,
        )
        .unwrap();
        let settings = load_settings_from_path(path.to_str().unwrap()).unwrap();
        assert_eq!(settings.version, 1);
        assert_eq!(settings.timeout_secs, 5);
        assert!(settings.flow_id);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(load_settings_from_path(path.to_str().unwrap()).is_err());
    }
}
