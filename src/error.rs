use thiserror::Error;

/// Invalid conflict generator configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown conflict generator '{0}', expected one of: {1}")]
    UnknownGenerator(String, String),
    #[error("conflict generator '{0}' requires the '{1}' cargo feature")]
    MissingFeature(String, &'static str),
}
