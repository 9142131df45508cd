//! YAML configuration file schema.
//!
//! Every field is optional; present fields override the environment-derived
//! base configuration.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::ConfigError;

/// On-disk configuration shape.
///
/// ```yaml
/// host: 0.0.0.0
/// port: 3000
/// openai_api_key: sk-...
/// model: gpt-4o-realtime-preview
/// voice: marin
/// default_language: hindi
/// supported_languages: [hindi, kannada, telugu]
/// prompts_dir: ./prompts
/// recordings_dir: ./recordings
/// greeting_delay_ms: 500
/// temperature: 0.8
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub openai_api_key: Option<String>,
    pub model: Option<String>,
    pub voice: Option<String>,
    pub default_language: Option<String>,
    pub supported_languages: Option<Vec<String>>,
    pub prompts_dir: Option<PathBuf>,
    pub recordings_dir: Option<PathBuf>,
    pub greeting_delay_ms: Option<u64>,
    pub temperature: Option<f32>,
}

impl YamlConfig {
    /// Parse a YAML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileRead(path.to_path_buf(), e))?;
        serde_yaml::from_str(&contents).map_err(ConfigError::Yaml)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = "port: 8080\nvoice: cedar\n";
        let config: YamlConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.port, Some(8080));
        assert_eq!(config.voice.as_deref(), Some("cedar"));
        assert!(config.host.is_none());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let yaml = "port: 8080\nnot_a_field: true\n";
        assert!(serde_yaml::from_str::<YamlConfig>(yaml).is_err());
    }

    #[test]
    fn test_from_file_missing_path() {
        let result = YamlConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::FileRead(_, _))));
    }

    #[test]
    fn test_from_file_roundtrip() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "default_language: kannada").unwrap();
        writeln!(file, "supported_languages: [hindi, kannada]").unwrap();

        let config = YamlConfig::from_file(file.path()).unwrap();
        assert_eq!(config.default_language.as_deref(), Some("kannada"));
        assert_eq!(
            config.supported_languages,
            Some(vec!["hindi".to_string(), "kannada".to_string()])
        );
    }
}
