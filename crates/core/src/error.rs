use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("missing config value: {0}")]
    Missing(String),

    #[error("invalid config value for {key}: expected {expected}")]
    Invalid { key: String, expected: &'static str },
}

impl ConfigError {
    pub(crate) fn invalid(key: &str, expected: &'static str) -> Self {
        ConfigError::Invalid {
            key: key.to_string(),
            expected,
        }
    }
}
