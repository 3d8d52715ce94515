use std::{
    collections::{hash_map::Entry, HashMap},
    sync::Arc,
};

use parking_lot::RwLock;
use tracing::{info, warn};

use crate::{
    client::RedisClient,
    codec::CodecRegistry,
    error::{Error, Result},
    settings::{DefaultSettings, RedisClientSettings, RedisSettings, SettingsSource},
    store::KeyValueStore,
};

/// Named registry of [`RedisClient`]s.
///
/// Built once from [`RedisSettings`]; afterwards the only way to add a client
/// is [`RedisClientsFactory::create`]. Lookups and inserts are safe from
/// parallel tests sharing one factory.
#[derive(Debug)]
pub struct RedisClientsFactory {
    clients: RwLock<HashMap<String, RedisClient>>,
    defaults: DefaultSettings,
    codecs: CodecRegistry,
}

impl RedisClientsFactory {
    /// Connects every configured client. `None` settings give an empty factory.
    pub async fn new(settings: Option<RedisSettings>, codecs: CodecRegistry) -> Result<Self> {
        let Some(settings) = settings else {
            warn!("No default RedisClients defined in the settings file");
            return Ok(Self::empty(codecs));
        };

        let mut clients = HashMap::new();
        for (name, resolved) in settings.resolve()? {
            let client = RedisClient::connect(&name, &resolved, &codecs).await?;
            clients.insert(name, client);
        }
        info!(clients = clients.len(), "RedisClientsFactory has been initialized");

        Ok(Self {
            clients: RwLock::new(clients),
            defaults: settings.defaults(),
            codecs,
        })
    }

    /// Loads settings from `source`; missing configuration is not an error.
    pub async fn from_sources(source: &SettingsSource, codecs: CodecRegistry) -> Result<Self> {
        Self::new(source.load()?, codecs).await
    }

    pub fn empty(codecs: CodecRegistry) -> Self {
        Self {
            clients: RwLock::new(HashMap::new()),
            defaults: DefaultSettings::default(),
            codecs,
        }
    }

    /// Returns the client called `name`, or the only client when `name` is `None` or empty.
    pub fn get_client(&self, name: Option<&str>) -> Result<RedisClient> {
        let clients = self.clients.read();
        if clients.is_empty() {
            return Err(Error::NoClients);
        }

        match name.filter(|n| !n.is_empty()) {
            None if clients.len() == 1 => clients.values().next().cloned().ok_or(Error::NoClients),
            None => Err(Error::AmbiguousClient(clients.len())),
            Some(name) => clients
                .get(name)
                .cloned()
                .ok_or_else(|| Error::ClientNotFound(name.to_string())),
        }
    }

    /// Connects and registers a new client; fails if `name` is taken.
    ///
    /// `settings` fall back to the factory's default settings like configured
    /// clients do.
    pub async fn create(&self, name: &str, settings: RedisClientSettings) -> Result<RedisClient> {
        self.ensure_vacant(name)?;
        let resolved = self.defaults.resolve(&settings)?;
        let client = RedisClient::connect(name, &resolved, &self.codecs).await?;
        self.register(name, client)
    }

    /// Same as [`RedisClientsFactory::create`] with an injected store.
    pub fn create_with_store(
        &self,
        name: &str,
        settings: RedisClientSettings,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<RedisClient> {
        self.ensure_vacant(name)?;
        let resolved = self.defaults.resolve(&settings)?;
        let client = RedisClient::with_store(name, &resolved, &self.codecs, store)?;
        self.register(name, client)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.clients.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.clients.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.read().is_empty()
    }

    fn ensure_vacant(&self, name: &str) -> Result<()> {
        if self.clients.read().contains_key(name) {
            return Err(Error::DuplicateClient(name.to_string()));
        }
        Ok(())
    }

    // Re-checked under the write lock: another task may have won the race
    // while this client was connecting.
    fn register(&self, name: &str, client: RedisClient) -> Result<RedisClient> {
        match self.clients.write().entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateClient(name.to_string())),
            Entry::Vacant(slot) => {
                info!(client = %name, "RedisClient has been registered");
                Ok(slot.insert(client).clone())
            }
        }
    }
}
