//! Load a settings object from an optional config file and the environment.

use std::{env, fmt::Debug, path::PathBuf};

use config::{Config, Environment, File, FileFormat};
use eyre::{eyre, Context, Result};
use serde::de::DeserializeOwned;

pub use trace::{Level, Style, TracingConfig};

/// Tracing subscriber setup
pub mod trace;

/// Env var naming a JSON config file to load before the environment overrides
pub const CONFIG_FILE_ENV_VAR: &str = "TXM_CONFIG_FILE";

/// Deserialize a settings object.
///
/// Sources, later ones overriding earlier ones:
/// 1. the JSON file named by `TXM_CONFIG_FILE`, if set
/// 2. environment variables starting with `<env_prefix>_`, nested keys
///    separated by `__` (e.g. `TXM_TRACING__LEVEL=debug`)
///
/// Fields missing from every source fall back to the type's serde defaults.
pub fn load_settings<T>(env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let config_file = env::var(CONFIG_FILE_ENV_VAR).ok().map(PathBuf::from);
    load_settings_from(config_file, env_prefix)
}

/// Like [`load_settings`] with an explicit config file path
pub fn load_settings_from<T>(config_file: Option<PathBuf>, env_prefix: &str) -> Result<T>
where
    T: DeserializeOwned + Debug,
{
    let mut builder = Config::builder();

    if let Some(path) = config_file {
        if !path.is_file() {
            return Err(eyre!("Provided config path is not a file ({path:?})"));
        }
        if path.extension() != Some("json".as_ref()) {
            return Err(eyre!(
                "Provided config path is of an unsupported type ({path:?})"
            ));
        }
        builder = builder.add_source(File::from(path).format(FileFormat::Json));
    }

    let config = builder
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()
        .context("Failed to load config sources")?;

    let settings = config
        .try_deserialize::<T>()
        .context("Config deserialization error")?;
    tracing::debug!(?settings, "Loaded settings");
    Ok(settings)
}
