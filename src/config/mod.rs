//! Server configuration.
//!
//! Configuration is layered: defaults, then environment variables (a `.env`
//! file is loaded in `main` before this runs), then an optional YAML file on
//! top. `OPENAI_API_KEY` has no default and no fallback; the server refuses
//! to start without it.

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

pub mod yaml;

pub use yaml::YamlConfig;

/// Instructions used when no prompt file can be read for a call's language.
const FALLBACK_INSTRUCTIONS: &str =
    "You are a helpful voice assistant on a phone call. Be concise, clear, \
     and professional. Speak naturally, as this is a spoken conversation.";

/// Languages with prompt files shipped alongside the server.
const DEFAULT_SUPPORTED_LANGUAGES: &[&str] = &["hindi", "kannada", "telugu"];

/// Configuration failures, all fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY is not configured")]
    MissingApiKey,

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),

    #[error("Failed to read config file {0}: {1}")]
    FileRead(PathBuf, #[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Speech-model API key; required
    pub openai_api_key: String,
    /// Realtime model identifier
    pub model: String,
    /// Synthesis voice
    pub voice: String,
    /// Language used when a call names none or an unsupported one
    pub default_language: String,
    /// Languages with prompt files
    pub supported_languages: Vec<String>,
    /// Directory of per-language prompt files (`{language}.txt`)
    pub prompts_dir: PathBuf,
    /// Directory recordings are written to
    pub recordings_dir: PathBuf,
    /// Delay before requesting the opening utterance
    pub greeting_delay_ms: u64,
    /// Model sampling temperature
    pub temperature: f32,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|k| !k.is_empty())
            .ok_or(ConfigError::MissingApiKey)?;

        let port = match std::env::var("PORT") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("PORT", raw))?,
            Err(_) => 3000,
        };

        let greeting_delay_ms = match std::env::var("GREETING_DELAY_MS") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("GREETING_DELAY_MS", raw))?,
            Err(_) => 500,
        };

        let temperature = match std::env::var("TEMPERATURE") {
            Ok(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidValue("TEMPERATURE", raw))?,
            Err(_) => 0.8,
        };

        let supported_languages = match std::env::var("SUPPORTED_LANGUAGES") {
            Ok(raw) => raw
                .split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => DEFAULT_SUPPORTED_LANGUAGES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        };

        Ok(ServerConfig {
            host: std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port,
            openai_api_key,
            model: std::env::var("REALTIME_MODEL")
                .unwrap_or_else(|_| "gpt-4o-realtime-preview".to_string()),
            voice: std::env::var("VOICE").unwrap_or_else(|_| "marin".to_string()),
            default_language: std::env::var("DEFAULT_LANGUAGE")
                .map(|l| l.to_lowercase())
                .unwrap_or_else(|_| "hindi".to_string()),
            supported_languages,
            prompts_dir: std::env::var("PROMPTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./prompts")),
            recordings_dir: std::env::var("RECORDINGS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./recordings")),
            greeting_delay_ms,
            temperature,
        })
    }

    /// Load from environment, then apply YAML overrides from `path`.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let overrides = YamlConfig::from_file(path)?;
        Ok(Self::from_env()?.apply_yaml(overrides))
    }

    /// Overlay YAML values on this configuration.
    fn apply_yaml(mut self, overrides: YamlConfig) -> Self {
        if let Some(host) = overrides.host {
            self.host = host;
        }
        if let Some(port) = overrides.port {
            self.port = port;
        }
        if let Some(key) = overrides.openai_api_key {
            self.openai_api_key = key;
        }
        if let Some(model) = overrides.model {
            self.model = model;
        }
        if let Some(voice) = overrides.voice {
            self.voice = voice;
        }
        if let Some(language) = overrides.default_language {
            self.default_language = language.to_lowercase();
        }
        if let Some(languages) = overrides.supported_languages {
            self.supported_languages = languages.iter().map(|l| l.to_lowercase()).collect();
        }
        if let Some(dir) = overrides.prompts_dir {
            self.prompts_dir = dir;
        }
        if let Some(dir) = overrides.recordings_dir {
            self.recordings_dir = dir;
        }
        if let Some(delay) = overrides.greeting_delay_ms {
            self.greeting_delay_ms = delay;
        }
        if let Some(temperature) = overrides.temperature {
            self.temperature = temperature;
        }
        self
    }

    /// Bind address as `host:port`.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Delay before the opening utterance is requested.
    pub fn greeting_delay(&self) -> Duration {
        Duration::from_millis(self.greeting_delay_ms)
    }

    /// Map a requested language onto the supported set, falling back to the
    /// default for unknown or absent values.
    pub fn resolve_language(&self, requested: Option<&str>) -> String {
        match requested {
            Some(language) => {
                let language = language.to_lowercase();
                if self.supported_languages.contains(&language) {
                    language
                } else {
                    warn!(
                        requested = %language,
                        fallback = %self.default_language,
                        "Unsupported language requested"
                    );
                    self.default_language.clone()
                }
            }
            None => self.default_language.clone(),
        }
    }

    /// Load the instructions prompt for `language`.
    ///
    /// Falls back to the default language's prompt file, then to a built-in
    /// instruction string; prompt problems should degrade the persona, not
    /// fail the call.
    pub fn load_instructions(&self, language: &str) -> String {
        let path = self.prompts_dir.join(format!("{language}.txt"));
        match std::fs::read_to_string(&path) {
            Ok(prompt) => prompt,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read prompt file");
                let fallback = self
                    .prompts_dir
                    .join(format!("{}.txt", self.default_language));
                std::fs::read_to_string(&fallback)
                    .unwrap_or_else(|_| FALLBACK_INSTRUCTIONS.to_string())
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 3000,
            openai_api_key: "sk-test".to_string(),
            model: "gpt-4o-realtime-preview".to_string(),
            voice: "marin".to_string(),
            default_language: "hindi".to_string(),
            supported_languages: vec![
                "hindi".to_string(),
                "kannada".to_string(),
                "telugu".to_string(),
            ],
            prompts_dir: PathBuf::from("./prompts"),
            recordings_dir: PathBuf::from("./recordings"),
            greeting_delay_ms: 500,
            temperature: 0.8,
        }
    }

    #[test]
    fn test_address_format() {
        assert_eq!(base_config().address(), "0.0.0.0:3000");
    }

    #[test]
    fn test_yaml_overlay_overrides_only_present_fields() {
        let overrides = YamlConfig {
            port: Some(8080),
            voice: Some("cedar".to_string()),
            ..Default::default()
        };

        let config = base_config().apply_yaml(overrides);
        assert_eq!(config.port, 8080);
        assert_eq!(config.voice, "cedar");
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.default_language, "hindi");
    }

    #[test]
    fn test_resolve_language_supported() {
        let config = base_config();
        assert_eq!(config.resolve_language(Some("kannada")), "kannada");
        assert_eq!(config.resolve_language(Some("Telugu")), "telugu");
    }

    #[test]
    fn test_resolve_language_falls_back() {
        let config = base_config();
        assert_eq!(config.resolve_language(Some("french")), "hindi");
        assert_eq!(config.resolve_language(None), "hindi");
    }

    #[test]
    fn test_load_instructions_from_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("kannada.txt"), "kannada prompt").unwrap();

        let mut config = base_config();
        config.prompts_dir = dir.path().to_path_buf();
        assert_eq!(config.load_instructions("kannada"), "kannada prompt");
    }

    #[test]
    fn test_load_instructions_default_language_fallback() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hindi.txt"), "hindi prompt").unwrap();

        let mut config = base_config();
        config.prompts_dir = dir.path().to_path_buf();
        assert_eq!(config.load_instructions("telugu"), "hindi prompt");
    }

    #[test]
    fn test_load_instructions_builtin_fallback() {
        let mut config = base_config();
        config.prompts_dir = PathBuf::from("/nonexistent");
        assert_eq!(config.load_instructions("hindi"), FALLBACK_INSTRUCTIONS);
    }
}
