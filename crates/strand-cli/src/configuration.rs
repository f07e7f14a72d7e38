use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct TelemetrySettings {
    #[serde(default = "default_telemetry_enabled")]
    pub enabled: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        TelemetrySettings {
            enabled: default_telemetry_enabled(),
        }
    }
}

/// Where run reports are sent
#[derive(Debug, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    pub api_key: String,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub telemetry: TelemetrySettings,
    #[serde(default)]
    pub cloud: Option<CloudSettings>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("telemetry.enabled", default_telemetry_enabled())?
            .add_source(
                Environment::with_prefix("STRAND")
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

                let error_str = err.to_string();
                if let Some(field) = missing_field(&error_str) {
                    let env_var = to_env_var(&field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

/// The dotted key of a "missing field `api_key` for key `cloud`" error.
/// Without the key suffix the field is looked up in the cloud section.
fn missing_field(message: &str) -> Option<String> {
    let rest = message.strip_prefix("missing field `")?;
    let (field, rest) = rest.split_once('`')?;
    match rest
        .strip_prefix(" for key `")
        .and_then(|key| key.strip_suffix('`'))
    {
        Some(key) => Some(format!("{}.{}", key, field)),
        None => Some(match field {
            "api_key" | "base_url" => format!("cloud.{}", field),
            other => other.to_string(),
        }),
    }
}

fn default_telemetry_enabled() -> bool {
    true
}

fn default_base_url() -> String {
    "https://api.assistant-ui.com".to_string()
}
