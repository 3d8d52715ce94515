//! Named, configuration-driven Redis clients for integration tests.
//!
//! A [`RedisClientsFactory`] is built from [`RedisSettings`] (usually loaded
//! from `test-settings.json` by a [`SettingsSource`]) and hands out
//! [`RedisClient`]s by name. Clients wrap string and hash commands with
//! pluggable serialization and structured `tracing` output, and can poll for
//! values that appear asynchronously with [`RedisClient::wait_and_get`].

#[cfg(test)]
mod capture;
pub mod client;
pub mod codec;
pub mod error;
pub mod factory;
pub mod logging;
pub mod mock;
pub mod settings;
pub mod store;
mod waiter;

pub use client::RedisClient;
pub use codec::{CodecRegistry, Deserializer, Serializer};
pub use error::{Error, Result};
pub use factory::RedisClientsFactory;
pub use settings::{
    DefaultSettings, RedisClientSettings, RedisSettings, ResolvedClientSettings, SettingsSource,
    WaiterSettings,
};
pub use store::{KeyValueStore, RedisStore};
