use thiserror::Error;

pub const ENV_PREFIX: &str = "BREEZE";

/// The variable the api key is read from when not set through the prefixed form
pub const API_KEY_ENV_VAR: &str = "GEMINI_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },
    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// Map a settings field to the environment variable that sets it.
///
/// Dotted paths such as `provider.model` become `BREEZE_PROVIDER__MODEL`. The api
/// key is reported under its conventional name.
pub fn to_env_var(field_path: &str) -> String {
    if field_path == "api_key" || field_path == "provider.api_key" {
        return API_KEY_ENV_VAR.to_string();
    }
    format!(
        "{}_{}",
        ENV_PREFIX,
        field_path.replace('.', "__").to_uppercase()
    )
}
