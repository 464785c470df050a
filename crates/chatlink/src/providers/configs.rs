use anyhow::{anyhow, Result};
use std::env;

use super::anthropic::{ANTHROPIC_HOST, ANTHROPIC_MODEL, ANTHROPIC_MODELS};
use super::openai::{OPENAI_HOST, OPENAI_MODEL, OPENAI_MODELS};

/// Unified enum to wrap different provider configurations
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    Anthropic(AnthropicProviderConfig),
    OpenAi(OpenAiProviderConfig),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OpenAiProviderConfig {
    pub host: String,
    pub api_key: String,
    pub model: String,
}

pub trait EnvConfig {
    /// Load configuration from environment variables
    fn from_env() -> Result<Self>
    where
        Self: Sized;

    /// Read an environment variable, falling back to `default` when it is optional
    fn get_env(key: &str, required: bool, default: Option<String>) -> Result<Option<String>> {
        match env::var(key) {
            Ok(value) => Ok(Some(value)),
            Err(env::VarError::NotPresent) if !required => Ok(default),
            Err(env::VarError::NotPresent) => Err(anyhow!(
                "Environment variable '{}' is required but not set.",
                key
            )),
            Err(e) => Err(e.into()),
        }
    }
}

/// Warn about models outside the list a provider is known to serve; they are still used
fn check_model(provider: &str, model: &str, known: &[&str]) {
    if !known.contains(&model) {
        tracing::warn!(provider, model, "Model is not in the known model list");
    }
}

impl AnthropicProviderConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            host: ANTHROPIC_HOST.to_string(),
            api_key: api_key.into(),
            model: ANTHROPIC_MODEL.to_string(),
        }
    }
}

impl EnvConfig for AnthropicProviderConfig {
    fn from_env() -> Result<Self> {
        let api_key = Self::get_env("ANTHROPIC_API_KEY", true, None)?
            .ok_or_else(|| anyhow!("Anthropic API key should be present"))?;
        let host = Self::get_env("ANTHROPIC_HOST", false, Some(ANTHROPIC_HOST.to_string()))?
            .unwrap_or_else(|| ANTHROPIC_HOST.to_string());
        let model = Self::get_env("ANTHROPIC_MODEL", false, Some(ANTHROPIC_MODEL.to_string()))?
            .unwrap_or_else(|| ANTHROPIC_MODEL.to_string());

        check_model("anthropic", &model, ANTHROPIC_MODELS);
        Ok(Self {
            host,
            api_key,
            model,
        })
    }
}

impl OpenAiProviderConfig {
    pub fn new<K: Into<String>>(api_key: K) -> Self {
        Self {
            host: OPENAI_HOST.to_string(),
            api_key: api_key.into(),
            model: OPENAI_MODEL.to_string(),
        }
    }
}

impl EnvConfig for OpenAiProviderConfig {
    fn from_env() -> Result<Self> {
        let api_key = Self::get_env("OPENAI_API_KEY", true, None)?
            .ok_or_else(|| anyhow!("OpenAI API key should be present"))?;
        let host = Self::get_env("OPENAI_HOST", false, Some(OPENAI_HOST.to_string()))?
            .unwrap_or_else(|| OPENAI_HOST.to_string());
        let model = Self::get_env("OPENAI_MODEL", false, Some(OPENAI_MODEL.to_string()))?
            .unwrap_or_else(|| OPENAI_MODEL.to_string());

        check_model("openai", &model, OPENAI_MODELS);
        Ok(Self {
            host,
            api_key,
            model,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clean_env() {
        for key in [
            "ANTHROPIC_API_KEY",
            "ANTHROPIC_HOST",
            "ANTHROPIC_MODEL",
            "OPENAI_API_KEY",
            "OPENAI_HOST",
            "OPENAI_MODEL",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    #[serial]
    fn test_anthropic_defaults() -> Result<()> {
        clean_env();
        env::set_var("ANTHROPIC_API_KEY", "test-key");

        let config = AnthropicProviderConfig::from_env()?;
        assert_eq!(config, AnthropicProviderConfig::new("test-key"));
        assert_eq!(config.model, "claude-3-haiku-20240307");

        clean_env();
        Ok(())
    }

    #[test]
    #[serial]
    fn test_openai_overrides() -> Result<()> {
        clean_env();
        env::set_var("OPENAI_API_KEY", "test-key");
        env::set_var("OPENAI_HOST", "http://localhost:8080");
        env::set_var("OPENAI_MODEL", "gpt-4o");

        let config = OpenAiProviderConfig::from_env()?;
        assert_eq!(config.host, "http://localhost:8080");
        assert_eq!(config.model, "gpt-4o");

        clean_env();
        Ok(())
    }

    #[test]
    #[serial]
    fn test_missing_api_key() {
        clean_env();
        let err = OpenAiProviderConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("OPENAI_API_KEY"));
    }
}
