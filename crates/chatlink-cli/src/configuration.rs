use anyhow::{bail, Context};
use chatlink::predictor::{DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use chatlink::providers::{
    anthropic::{ANTHROPIC_HOST, ANTHROPIC_MODEL},
    configs::{AnthropicProviderConfig, EnvConfig, OpenAiProviderConfig, ProviderConfig},
    factory::ProviderType,
    openai::{OPENAI_HOST, OPENAI_MODEL},
};
use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;

const ENV_PREFIX: &str = "CHATLINK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Environment variable that sets a provider field, e.g. `CHATLINK_PROVIDER__API_KEY`
pub fn to_env_var(field: &str) -> String {
    let field = field.trim_start_matches("provider.");
    format!("{}_PROVIDER__{}", ENV_PREFIX, field.to_uppercase())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum ProviderSettings {
    Anthropic {
        #[serde(default = "default_anthropic_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_anthropic_model")]
        model: String,
    },
    OpenAi {
        #[serde(default = "default_openai_host")]
        host: String,
        api_key: String,
        #[serde(default = "default_openai_model")]
        model: String,
    },
}

impl ProviderSettings {
    pub fn into_config(self) -> ProviderConfig {
        match self {
            ProviderSettings::Anthropic {
                host,
                api_key,
                model,
            } => ProviderConfig::Anthropic(AnthropicProviderConfig {
                host,
                api_key,
                model,
            }),
            ProviderSettings::OpenAi {
                host,
                api_key,
                model,
            } => ProviderConfig::OpenAi(OpenAiProviderConfig {
                host,
                api_key,
                model,
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PredictSettings {
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

impl Default for PredictSettings {
    fn default() -> Self {
        Self {
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub provider: Option<ProviderSettings>,
    #[serde(default)]
    pub predict: PredictSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        match config.try_deserialize::<Self>() {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else if let config::ConfigError::NotFound(field) = &err {
                    Err(ConfigError::MissingEnvVar {
                        env_var: to_env_var(field),
                    })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }

    /// The configured provider, falling back to the vendor variables when no
    /// `CHATLINK_PROVIDER__TYPE` is set
    ///
    /// Without a `requested` type the fallback tries `ANTHROPIC_API_KEY`, then `OPENAI_API_KEY`.
    pub fn provider_config(
        self,
        requested: Option<ProviderType>,
    ) -> anyhow::Result<ProviderConfig> {
        if let Some(provider) = self.provider {
            let config = provider.into_config();
            match requested {
                Some(requested) if requested != config.provider_type() => bail!(
                    "Provider {} was requested but CHATLINK_PROVIDER__TYPE is {}",
                    requested,
                    config.provider_type()
                ),
                _ => return Ok(config),
            }
        }

        match requested {
            Some(ProviderType::Anthropic) => {
                Ok(ProviderConfig::Anthropic(AnthropicProviderConfig::from_env()?))
            }
            Some(ProviderType::OpenAi) => {
                Ok(ProviderConfig::OpenAi(OpenAiProviderConfig::from_env()?))
            }
            None => match AnthropicProviderConfig::from_env() {
                Ok(config) => Ok(ProviderConfig::Anthropic(config)),
                Err(_) => OpenAiProviderConfig::from_env()
                    .map(ProviderConfig::OpenAi)
                    .context("No provider configured: set CHATLINK_PROVIDER__TYPE, ANTHROPIC_API_KEY or OPENAI_API_KEY"),
            },
        }
    }
}

/// Field name out of serde's "missing field `api_key`" message
fn missing_field(message: &str) -> Option<&str> {
    let start = message.find("missing field `")? + "missing field `".len();
    message[start..].split('`').next()
}

fn default_anthropic_host() -> String {
    ANTHROPIC_HOST.to_string()
}

fn default_anthropic_model() -> String {
    ANTHROPIC_MODEL.to_string()
}

fn default_openai_host() -> String {
    OPENAI_HOST.to_string()
}

fn default_openai_model() -> String {
    OPENAI_MODEL.to_string()
}

fn default_temperature() -> f32 {
    DEFAULT_TEMPERATURE
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT
}
