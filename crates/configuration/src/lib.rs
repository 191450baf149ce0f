use std::path::Path;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::Settings;

/// Loads the application configuration.
///
/// Built-in defaults are merged with an optional TOML file and `CADENCE_*`
/// environment variables (e.g. `CADENCE_SERVER__PORT=9000`), so the service
/// runs out of the box with no file present.
pub fn load_config(path: Option<&Path>) -> Result<Settings, ConfigError> {
    let defaults = config::Config::try_from(&Settings::default())?;

    let mut builder = config::Config::builder().add_source(defaults);
    match path {
        Some(p) => {
            builder = builder.add_source(config::File::from(p));
        }
        None => {
            builder = builder.add_source(config::File::with_name("cadence").required(false));
        }
    }
    let built = builder
        .add_source(config::Environment::with_prefix("CADENCE").separator("__"))
        .build()?;

    let settings = built.try_deserialize::<Settings>()?;
    if settings.trading.reconcile_attempts == 0 {
        return Err(ConfigError::ValidationError(
            "trading.reconcile_attempts must be at least 1".to_string(),
        ));
    }
    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let settings = load_config(None).expect("defaults should deserialize");
        assert_eq!(settings.valuation.cache_ttl_secs, 300);
        assert_eq!(settings.schedule.misfire_grace_secs, 86_400);
    }

    #[test]
    fn size_precision_prefers_override_then_major_split() {
        let mut settings = Settings::default();
        assert_eq!(settings.size_precision("BTC-USDT"), 8);
        assert_eq!(settings.size_precision("DOGE-USDT"), 4);

        settings
            .trading
            .size_precision_overrides
            .insert("DOGE-USDT".to_string(), 2);
        assert_eq!(settings.size_precision("DOGE-USDT"), 2);
    }
}
