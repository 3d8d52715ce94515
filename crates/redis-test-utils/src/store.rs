use std::{collections::HashMap, fmt};

use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client, RedisResult};
use tokio::sync::Mutex;

/// The slice of the Redis command set used by [`crate::RedisClient`].
///
/// Every call is addressed by database index. Missing keys and fields are
/// reported as `None`; deleting something absent is not an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync + fmt::Debug {
    async fn get(&self, db: i64, key: &str) -> RedisResult<Option<String>>;

    async fn set(&self, db: i64, key: &str, value: &str) -> RedisResult<()>;

    async fn delete(&self, db: i64, key: &str) -> RedisResult<()>;

    async fn hash_get(&self, db: i64, key: &str, field: &str) -> RedisResult<Option<String>>;

    async fn hash_set(&self, db: i64, key: &str, field: &str, value: &str) -> RedisResult<()>;

    async fn hash_delete(&self, db: i64, key: &str, field: &str) -> RedisResult<()>;

    /// Removes every key of one database.
    async fn flush(&self, db: i64) -> RedisResult<()>;
}

/// [`KeyValueStore`] backed by a live Redis server.
///
/// A `ConnectionManager` is bound to a single database, so one manager is
/// kept per database index. The database named in the connection string is
/// connected eagerly; the others are opened on first use.
pub struct RedisStore {
    client: Client,
    managers: Mutex<HashMap<i64, ConnectionManager>>,
}

impl RedisStore {
    pub async fn connect(connection_string: &str) -> RedisResult<Self> {
        let client = Client::open(connection_string)?;
        let default_db = client.get_connection_info().redis.db;
        let manager = ConnectionManager::new(client.clone()).await?;

        let mut managers = HashMap::new();
        managers.insert(default_db, manager);

        Ok(Self {
            client,
            managers: Mutex::new(managers),
        })
    }

    /// Multiplexed connection selecting `db`, for commands this crate does not wrap.
    pub async fn connection(&self, db: i64) -> RedisResult<ConnectionManager> {
        if let Some(manager) = self.managers.lock().await.get(&db) {
            return Ok(manager.clone());
        }

        // Connect without the lock so other databases stay usable meanwhile.
        let mut info = self.client.get_connection_info().clone();
        info.redis.db = db;
        let manager = ConnectionManager::new(Client::open(info)?).await?;

        // First manager stored for `db` wins a concurrent open.
        Ok(self
            .managers
            .lock()
            .await
            .entry(db)
            .or_insert(manager)
            .clone())
    }

    /// Number of databases with an open manager.
    pub async fn open_databases(&self) -> usize {
        self.managers.lock().await.len()
    }
}

impl fmt::Debug for RedisStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStore")
            .field("addr", &self.client.get_connection_info().addr)
            .finish()
    }
}

#[async_trait]
impl KeyValueStore for RedisStore {
    async fn get(&self, db: i64, key: &str) -> RedisResult<Option<String>> {
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut self.connection(db).await?)
            .await
    }

    async fn set(&self, db: i64, key: &str, value: &str) -> RedisResult<()> {
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<_, ()>(&mut self.connection(db).await?)
            .await
    }

    async fn delete(&self, db: i64, key: &str) -> RedisResult<()> {
        redis::cmd("DEL")
            .arg(key)
            .query_async::<_, ()>(&mut self.connection(db).await?)
            .await
    }

    async fn hash_get(&self, db: i64, key: &str, field: &str) -> RedisResult<Option<String>> {
        redis::cmd("HGET")
            .arg(key)
            .arg(field)
            .query_async(&mut self.connection(db).await?)
            .await
    }

    async fn hash_set(&self, db: i64, key: &str, field: &str, value: &str) -> RedisResult<()> {
        redis::cmd("HSET")
            .arg(key)
            .arg(field)
            .arg(value)
            .query_async::<_, ()>(&mut self.connection(db).await?)
            .await
    }

    async fn hash_delete(&self, db: i64, key: &str, field: &str) -> RedisResult<()> {
        redis::cmd("HDEL")
            .arg(key)
            .arg(field)
            .query_async::<_, ()>(&mut self.connection(db).await?)
            .await
    }

    async fn flush(&self, db: i64) -> RedisResult<()> {
        redis::cmd("FLUSHDB")
            .query_async::<_, ()>(&mut self.connection(db).await?)
            .await
    }
}
