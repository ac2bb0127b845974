#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid yaml in {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("settings validation failed: {0}")]
    Settings(String),
    #[error("engine config for organization `{organization_id}` is invalid: {reason}")]
    Engine {
        organization_id: String,
        reason: String,
    },
    #[error("environment variable `{name}` is not set")]
    MissingEnv { name: String },
    #[error("failed to resolve home directory for default settings path")]
    HomeDirectoryUnavailable,
}
