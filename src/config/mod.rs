pub mod error;
pub mod load;
pub mod paths;
pub mod settings;

pub use error::ConfigError;
pub use load::load_global_settings;
pub use paths::{
    default_settings_path, StatePaths, DATABASE_FILE_NAME, GLOBAL_SETTINGS_FILE_NAME,
    GLOBAL_STATE_DIR,
};
pub use settings::{EngineConfig, GatewayConfig, ResolutionConfig, ScorerKind, Settings};
