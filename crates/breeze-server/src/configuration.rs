use crate::error::{to_env_var, ConfigError, API_KEY_ENV_VAR, ENV_PREFIX};
use breeze::agent::DEFAULT_MAX_TURNS;
use breeze::providers::configs::{OpenAiProviderConfig, DEFAULT_BASE_URL, DEFAULT_MODEL};
use config::{Config, Environment};
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Deserialize)]
pub struct ProviderSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<i32>,
}

impl ProviderSettings {
    pub fn into_config(self) -> OpenAiProviderConfig {
        OpenAiProviderConfig {
            base_url: self.base_url,
            api_key: self.api_key,
            model: self.model,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_agent_name")]
    pub name: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            name: default_agent_name(),
            instructions: default_instructions(),
            max_turns: default_max_turns(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    pub provider: ProviderSettings,
    #[serde(default)]
    pub agent: AgentSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port())?
            // Provider defaults
            .set_default("provider.base_url", default_base_url())?
            .set_default("provider.model", default_model())?
            // Agent defaults
            .set_default("agent.name", default_agent_name())?
            .set_default("agent.instructions", default_instructions())?
            .set_default("agent.max_turns", default_max_turns() as u64)?;

        // The plain api key variable seeds the value, the prefixed one still wins
        if let Ok(api_key) = std::env::var(API_KEY_ENV_VAR) {
            builder = builder.set_default("provider.api_key", api_key)?;
        }

        let config = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                // Missing fields surface as "missing field `name`"
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
}

fn missing_field(error: &str) -> Option<&str> {
    let rest = &error[error.find("missing field `")? + "missing field `".len()..];
    rest.split('`').next()
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_agent_name() -> String {
    "Agent".to_string()
}

fn default_instructions() -> String {
    "You are a helpful agent. use get_weather tool to get temparture of the location.".to_string()
}

fn default_max_turns() -> usize {
    DEFAULT_MAX_TURNS
}
