use std::{
    collections::BTreeMap,
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::{
    codec,
    error::{Error, Result},
};

pub const DEFAULT_RETRY_COUNT: u32 = 30;
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

/// Section of the settings file holding [`RedisSettings`].
pub const SETTINGS_SECTION: &str = "redis_settings";
/// Names the environment overlay file, e.g. `test-settings.ci.json`.
pub const ENVIRONMENT_VAR: &str = "REDIS_TEST_ENVIRONMENT";
pub const ENV_PREFIX: &str = "REDIS_TEST";

const BASE_FILE_NAMES: [&str; 2] = ["test-settings", "appsettings"];
const EXTENSIONS: [&str; 2] = ["json", "toml"];

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct WaiterSettings {
    #[serde(default)]
    pub retry_count: Option<u32>,
    #[serde(default)]
    pub interval_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RedisClientSettings {
    pub connection_string: String,
    #[serde(default)]
    pub waiter_settings: Option<WaiterSettings>,
    #[serde(default)]
    pub serializer_id: Option<String>,
    #[serde(default)]
    pub deserializer_id: Option<String>,
}

impl RedisClientSettings {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            ..Default::default()
        }
    }
}

/// Process-wide values every client falls back to.
#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct DefaultSettings {
    #[serde(default)]
    pub waiter_settings: Option<WaiterSettings>,
    #[serde(default)]
    pub serializer_id: Option<String>,
    #[serde(default)]
    pub deserializer_id: Option<String>,
}

impl DefaultSettings {
    /// Cascades `client` onto these defaults and then onto the hardcoded fallbacks.
    pub fn resolve(&self, client: &RedisClientSettings) -> Result<ResolvedClientSettings> {
        if client.connection_string.trim().is_empty() {
            return Err(Error::InvalidSettings(
                "connection_string must not be empty".to_string(),
            ));
        }

        let own = client.waiter_settings.as_ref();
        let shared = self.waiter_settings.as_ref();

        let retry_count = own
            .and_then(|w| w.retry_count)
            .or_else(|| shared.and_then(|w| w.retry_count))
            .unwrap_or(DEFAULT_RETRY_COUNT);
        let interval = own
            .and_then(|w| w.interval_ms)
            .or_else(|| shared.and_then(|w| w.interval_ms))
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_INTERVAL);

        Ok(ResolvedClientSettings {
            connection_string: client.connection_string.clone(),
            retry_count,
            interval,
            serializer_id: client
                .serializer_id
                .clone()
                .or_else(|| self.serializer_id.clone())
                .unwrap_or_else(|| codec::JSON.to_string()),
            deserializer_id: client
                .deserializer_id
                .clone()
                .or_else(|| self.deserializer_id.clone())
                .unwrap_or_else(|| codec::JSON.to_string()),
        })
    }
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct RedisSettings {
    #[serde(default)]
    pub default_settings: Option<DefaultSettings>,
    #[serde(default)]
    pub redis_clients: BTreeMap<String, RedisClientSettings>,
}

impl RedisSettings {
    pub fn defaults(&self) -> DefaultSettings {
        self.default_settings.clone().unwrap_or_default()
    }

    /// Resolves every configured client, failing on the first invalid entry.
    pub fn resolve(&self) -> Result<BTreeMap<String, ResolvedClientSettings>> {
        let defaults = self.defaults();
        self.redis_clients
            .iter()
            .map(|(name, client)| {
                let resolved = defaults.resolve(client).map_err(|e| match e {
                    Error::InvalidSettings(msg) => {
                        Error::InvalidSettings(format!("RedisClient '{}': {}", name, msg))
                    }
                    other => other,
                })?;
                Ok((name.clone(), resolved))
            })
            .collect()
    }
}

/// Settings of one client with every fallback applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedClientSettings {
    pub connection_string: String,
    pub retry_count: u32,
    pub interval: Duration,
    pub serializer_id: String,
    pub deserializer_id: String,
}

impl ResolvedClientSettings {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: connection_string.into(),
            retry_count: DEFAULT_RETRY_COUNT,
            interval: DEFAULT_INTERVAL,
            serializer_id: codec::JSON.to_string(),
            deserializer_id: codec::JSON.to_string(),
        }
    }
}

/// Where [`RedisSettings`] are read from.
///
/// Sources are layered: `test-settings.{json,toml}` (or `appsettings.*` when
/// there is no test settings file) in `base_dir`, then the optional
/// `<name>.<environment>.*` overlay, then `REDIS_TEST__*` environment
/// variables using `__` as the nesting separator. Later layers match keys
/// case-insensitively; the names written in the files are kept.
#[derive(Debug, Clone)]
pub struct SettingsSource {
    base_dir: PathBuf,
    environment: Option<String>,
    env_prefix: String,
}

impl SettingsSource {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            environment: env::var(ENVIRONMENT_VAR).ok().filter(|e| !e.is_empty()),
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Loads the settings, or `None` when no settings file or section exists.
    pub fn load(&self) -> Result<Option<RedisSettings>> {
        let Some((name, base_file)) = self.base_file() else {
            return Ok(None);
        };

        let mut merged = read_file(&base_file)?;
        if let Some(overlay) = self
            .environment
            .as_ref()
            .and_then(|env| find_with_extension(&self.base_dir, &format!("{}.{}", name, env)))
        {
            merge(&mut merged, read_file(&overlay)?);
        }
        merge(&mut merged, self.environment_overrides()?);

        let Some(section) = merged.get_mut(SETTINGS_SECTION).map(Value::take) else {
            return Ok(None);
        };
        let settings: RedisSettings = serde_json::from_value(section)?;

        info!(
            file = %base_file.display(),
            clients = settings.redis_clients.len(),
            "RedisSettings have been read and initialized"
        );
        Ok(Some(settings))
    }

    fn base_file(&self) -> Option<(&'static str, PathBuf)> {
        BASE_FILE_NAMES
            .iter()
            .find_map(|name| find_with_extension(&self.base_dir, name).map(|path| (*name, path)))
    }

    // The environment only yields lowercase keys; `merge` maps them back onto
    // the spelling used in the files.
    fn environment_overrides(&self) -> Result<Value> {
        let overrides = Config::builder()
            .add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        Ok(overrides.try_deserialize()?)
    }
}

impl Default for SettingsSource {
    fn default() -> Self {
        Self::new(".")
    }
}

fn find_with_extension(dir: &Path, stem: &str) -> Option<PathBuf> {
    EXTENSIONS
        .iter()
        .map(|ext| dir.join(format!("{}.{}", stem, ext)))
        .find(|path| path.is_file())
}

/// Parses a settings file as-is, so map keys such as client names keep their case.
fn read_file(path: &Path) -> Result<Value> {
    let text = fs::read_to_string(path).map_err(|e| ConfigError::Foreign(Box::new(e)))?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str::<Value>(&text).map_err(|e| parse_error(path, e)),
        _ => serde_json::from_str::<Value>(&text).map_err(|e| parse_error(path, e)),
    };
    Ok(parsed?)
}

fn parse_error(path: &Path, cause: impl std::error::Error + Send + Sync + 'static) -> ConfigError {
    ConfigError::FileParse {
        uri: Some(path.display().to_string()),
        cause: Box::new(cause),
    }
}

/// Deep-merges `overlay` into `base`. Object keys match case-insensitively and
/// keep the spelling already present in `base`.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                let existing = base.keys().find(|k| k.eq_ignore_ascii_case(&key)).cloned();
                match existing.and_then(|existing| base.get_mut(&existing)) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
