// Configuration management module
// TOML configuration stored in the base directory

pub mod settings;


pub use settings::{
    Config, ConfigError, GenerationConfig, HOME_ENV_VAR, IndexConfig, OllamaConfig,
};

/// Get the configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::config_dir()
}

/// Render the effective configuration for display
#[inline]
pub fn render_config(config: &Config) -> anyhow::Result<String> {
    let mut shown = config.clone();
    if shown.generation.api_token.is_some() {
        shown.generation.api_token = Some("********".to_string());
    }
    Ok(toml::to_string_pretty(&shown)?)
}
