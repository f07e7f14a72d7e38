use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable: {env_var}")]
    MissingEnvVar { env_var: String },

    #[error("Configuration error: {0}")]
    Other(#[from] config::ConfigError),
}

/// The environment variable that sets a dotted config key
pub fn to_env_var(field: &str) -> String {
    format!("STRAND_{}", field.replace('.', "__").to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_env_var() {
        assert_eq!(to_env_var("cloud.api_key"), "STRAND_CLOUD__API_KEY");
        assert_eq!(to_env_var("telemetry.enabled"), "STRAND_TELEMETRY__ENABLED");
    }
}
