use super::{default_settings_path, ConfigError, Settings};

pub fn load_global_settings() -> Result<Settings, ConfigError> {
    let path = default_settings_path()?;
    let settings = Settings::from_path(&path)?;
    settings.validate()?;
    Ok(settings)
}
