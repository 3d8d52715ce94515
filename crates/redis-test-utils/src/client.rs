use serde::{de::DeserializeOwned, Serialize};
use std::{fmt, sync::Arc, time::Duration};
use redis::aio::ConnectionManager;
use tracing::{error, info};

use crate::{
    codec::{CodecRegistry, Deserializer, Serializer},
    error::{Error, Result},
    settings::ResolvedClientSettings,
    store::{KeyValueStore, RedisStore},
};

struct ClientInner {
    name: String,
    store: Arc<dyn KeyValueStore>,
    server: Option<Arc<RedisStore>>,
    serializer: Arc<dyn Serializer>,
    deserializer: Arc<dyn Deserializer>,
    retry_count: u32,
    interval: Duration,
}

/// A named Redis client for tests.
///
/// Cloning is cheap and every clone talks to the same store. Each operation
/// emits exactly one `tracing` event: `info` with the request and result on
/// success, `error` with the request and the cause on failure. Failures are
/// always returned to the caller.
#[derive(Clone)]
pub struct RedisClient {
    inner: Arc<ClientInner>,
}

impl RedisClient {
    /// Resolves the codecs and connects to the server named in `settings`.
    pub async fn connect(
        name: &str,
        settings: &ResolvedClientSettings,
        codecs: &CodecRegistry,
    ) -> Result<Self> {
        // codecs first so a typo in the settings fails without touching the network
        let serializer = codecs.serializer(&settings.serializer_id)?;
        let deserializer = codecs.deserializer(&settings.deserializer_id)?;
        let server = Arc::new(RedisStore::connect(&settings.connection_string).await?);

        Ok(Self::assemble(
            name,
            settings,
            server.clone(),
            Some(server),
            serializer,
            deserializer,
        ))
    }

    /// Builds a client on top of an existing store, e.g. a [`crate::mock::MemoryStore`].
    pub fn with_store(
        name: &str,
        settings: &ResolvedClientSettings,
        codecs: &CodecRegistry,
        store: Arc<dyn KeyValueStore>,
    ) -> Result<Self> {
        let serializer = codecs.serializer(&settings.serializer_id)?;
        let deserializer = codecs.deserializer(&settings.deserializer_id)?;
        Ok(Self::assemble(
            name,
            settings,
            store,
            None,
            serializer,
            deserializer,
        ))
    }

    fn assemble(
        name: &str,
        settings: &ResolvedClientSettings,
        store: Arc<dyn KeyValueStore>,
        server: Option<Arc<RedisStore>>,
        serializer: Arc<dyn Serializer>,
        deserializer: Arc<dyn Deserializer>,
    ) -> Self {
        let client = Self {
            inner: Arc::new(ClientInner {
                name: name.to_string(),
                store,
                server,
                serializer,
                deserializer,
                retry_count: settings.retry_count,
                interval: settings.interval,
            }),
        };
        info!(
            client = %name,
            retry_count = settings.retry_count,
            interval = ?settings.interval,
            serializer = %settings.serializer_id,
            deserializer = %settings.deserializer_id,
            "RedisClient has been initialized"
        );
        client
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn serializer(&self) -> &Arc<dyn Serializer> {
        &self.inner.serializer
    }

    pub fn deserializer(&self) -> &Arc<dyn Deserializer> {
        &self.inner.deserializer
    }

    /// The store behind the convenience methods.
    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner.store
    }

    /// Multiplexed server connection selecting `db`, for commands this crate
    /// does not wrap.
    ///
    /// Fails with [`Error::NoConnection`] for clients built on an injected store.
    pub async fn connection(&self, db: i64) -> Result<ConnectionManager> {
        let server = self
            .inner
            .server
            .as_ref()
            .ok_or_else(|| Error::NoConnection(self.name().to_string()))?;
        Ok(server.connection(db).await?)
    }

    /// Attempts made by the waiter when the caller does not pass a count.
    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub async fn add_string(&self, db: i64, key: &str, value: &str) -> Result<()> {
        match self.inner.store.set(db, key, value).await {
            Ok(()) => {
                info!(client = %self.name(), db, key, value, "add_string succeeded");
                Ok(())
            }
            Err(e) => {
                error!(client = %self.name(), db, key, value, error = %e, "add_string failed");
                Err(e.into())
            }
        }
    }

    /// Stores `value` encoded by `serializer`, or by the client default when `None`.
    pub async fn add_object<T: Serialize + ?Sized>(
        &self,
        db: i64,
        key: &str,
        value: &T,
        serializer: Option<&dyn Serializer>,
    ) -> Result<()> {
        let encoded = match self.encode(value, serializer) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(client = %self.name(), db, key, error = %e, "add_object failed");
                return Err(e);
            }
        };

        match self.inner.store.set(db, key, &encoded).await {
            Ok(()) => {
                info!(client = %self.name(), db, key, value = %encoded, "add_object succeeded");
                Ok(())
            }
            Err(e) => {
                error!(
                    client = %self.name(), db, key, value = %encoded, error = %e,
                    "add_object failed"
                );
                Err(e.into())
            }
        }
    }

    /// Returns `None` when the key does not exist.
    pub async fn get_string(&self, db: i64, key: &str) -> Result<Option<String>> {
        match self.inner.store.get(db, key).await {
            Ok(value) => {
                info!(client = %self.name(), db, key, result = ?value, "get_string succeeded");
                Ok(value)
            }
            Err(e) => {
                error!(client = %self.name(), db, key, error = %e, "get_string failed");
                Err(e.into())
            }
        }
    }

    /// Returns `None` when the key does not exist; the deserializer only sees stored values.
    pub async fn get_object<T: DeserializeOwned>(
        &self,
        db: i64,
        key: &str,
        deserializer: Option<&dyn Deserializer>,
    ) -> Result<Option<T>> {
        let result = async {
            let raw = self.inner.store.get(db, key).await?;
            let decoded = match raw.as_deref() {
                Some(raw) => Some(self.decode(raw, deserializer)?),
                None => None,
            };
            Ok::<_, Error>((raw, decoded))
        }
        .await;

        match result {
            Ok((raw, decoded)) => {
                info!(client = %self.name(), db, key, result = ?raw, "get_object succeeded");
                Ok(decoded)
            }
            Err(e) => {
                error!(client = %self.name(), db, key, error = %e, "get_object failed");
                Err(e)
            }
        }
    }

    pub async fn add_hash_string(&self, db: i64, key: &str, field: &str, value: &str) -> Result<()> {
        match self.inner.store.hash_set(db, key, field, value).await {
            Ok(()) => {
                info!(client = %self.name(), db, key, field, value, "add_hash_string succeeded");
                Ok(())
            }
            Err(e) => {
                error!(
                    client = %self.name(), db, key, field, value, error = %e,
                    "add_hash_string failed"
                );
                Err(e.into())
            }
        }
    }

    pub async fn add_hash_object<T: Serialize + ?Sized>(
        &self,
        db: i64,
        key: &str,
        field: &str,
        value: &T,
        serializer: Option<&dyn Serializer>,
    ) -> Result<()> {
        let encoded = match self.encode(value, serializer) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!(client = %self.name(), db, key, field, error = %e, "add_hash_object failed");
                return Err(e);
            }
        };

        match self.inner.store.hash_set(db, key, field, &encoded).await {
            Ok(()) => {
                info!(
                    client = %self.name(), db, key, field, value = %encoded,
                    "add_hash_object succeeded"
                );
                Ok(())
            }
            Err(e) => {
                error!(
                    client = %self.name(), db, key, field, value = %encoded, error = %e,
                    "add_hash_object failed"
                );
                Err(e.into())
            }
        }
    }

    pub async fn get_hash_string(&self, db: i64, key: &str, field: &str) -> Result<Option<String>> {
        match self.inner.store.hash_get(db, key, field).await {
            Ok(value) => {
                info!(
                    client = %self.name(), db, key, field, result = ?value,
                    "get_hash_string succeeded"
                );
                Ok(value)
            }
            Err(e) => {
                error!(client = %self.name(), db, key, field, error = %e, "get_hash_string failed");
                Err(e.into())
            }
        }
    }

    pub async fn get_hash_object<T: DeserializeOwned>(
        &self,
        db: i64,
        key: &str,
        field: &str,
        deserializer: Option<&dyn Deserializer>,
    ) -> Result<Option<T>> {
        let result = async {
            let raw = self.inner.store.hash_get(db, key, field).await?;
            let decoded = match raw.as_deref() {
                Some(raw) => Some(self.decode(raw, deserializer)?),
                None => None,
            };
            Ok::<_, Error>((raw, decoded))
        }
        .await;

        match result {
            Ok((raw, decoded)) => {
                info!(
                    client = %self.name(), db, key, field, result = ?raw,
                    "get_hash_object succeeded"
                );
                Ok(decoded)
            }
            Err(e) => {
                error!(client = %self.name(), db, key, field, error = %e, "get_hash_object failed");
                Err(e)
            }
        }
    }

    pub async fn delete_key(&self, db: i64, key: &str) -> Result<()> {
        match self.inner.store.delete(db, key).await {
            Ok(()) => {
                info!(client = %self.name(), db, key, "delete_key succeeded");
                Ok(())
            }
            Err(e) => {
                error!(client = %self.name(), db, key, error = %e, "delete_key failed");
                Err(e.into())
            }
        }
    }

    pub async fn delete_hash_field(&self, db: i64, key: &str, field: &str) -> Result<()> {
        match self.inner.store.hash_delete(db, key, field).await {
            Ok(()) => {
                info!(client = %self.name(), db, key, field, "delete_hash_field succeeded");
                Ok(())
            }
            Err(e) => {
                error!(client = %self.name(), db, key, field, error = %e, "delete_hash_field failed");
                Err(e.into())
            }
        }
    }

    /// Removes every key of database `db`. Meant for isolating test cases.
    pub async fn clean(&self, db: i64) -> Result<()> {
        match self.inner.store.flush(db).await {
            Ok(()) => {
                info!(client = %self.name(), db, "clean succeeded");
                Ok(())
            }
            Err(e) => {
                error!(client = %self.name(), db, error = %e, "clean failed");
                Err(e.into())
            }
        }
    }

    fn encode<T: Serialize + ?Sized>(
        &self,
        value: &T,
        serializer: Option<&dyn Serializer>,
    ) -> Result<String> {
        let value = serde_json::to_value(value)?;
        let serializer = serializer.unwrap_or(self.inner.serializer.as_ref());
        Ok(serializer.serialize(&value)?)
    }

    fn decode<T: DeserializeOwned>(
        &self,
        raw: &str,
        deserializer: Option<&dyn Deserializer>,
    ) -> Result<T> {
        let deserializer = deserializer.unwrap_or(self.inner.deserializer.as_ref());
        let value = deserializer.deserialize(raw)?;
        Ok(serde_json::from_value(value)?)
    }
}

impl fmt::Debug for RedisClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisClient")
            .field("name", &self.inner.name)
            .field("store", &self.inner.store)
            .field("connected", &self.inner.server.is_some())
            .field("serializer", &self.inner.serializer)
            .field("deserializer", &self.inner.deserializer)
            .field("retry_count", &self.inner.retry_count)
            .field("interval", &self.inner.interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capture::EventCapture, codec::JsonDeserializer, mock::MemoryStore};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct TestData {
        name: String,
        id: i32,
    }

    #[derive(Debug, Default)]
    struct CountingSerializer {
        calls: AtomicUsize,
    }

    impl Serializer for CountingSerializer {
        fn serialize(&self, value: &serde_json::Value) -> std::result::Result<String, serde_json::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            serde_json::to_string(value)
        }
    }

    #[derive(Debug, Default)]
    struct CountingDeserializer {
        calls: AtomicUsize,
    }

    impl Deserializer for CountingDeserializer {
        fn deserialize(&self, raw: &str) -> std::result::Result<serde_json::Value, serde_json::Error> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            JsonDeserializer.deserialize(raw)
        }
    }

    fn memory_client() -> (RedisClient, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let client = RedisClient::with_store(
            "local",
            &ResolvedClientSettings::new("redis://127.0.0.1/"),
            &CodecRegistry::default(),
            store.clone(),
        )
        .unwrap();
        (client, store)
    }

    fn test_data() -> TestData {
        TestData {
            name: "a".to_string(),
            id: 1,
        }
    }

    #[tokio::test]
    async fn test_string_roundtrip() {
        let (client, _) = memory_client();
        client.add_string(0, "k", "v").await.unwrap();
        assert_eq!(client.get_string(0, "k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_object_roundtrip_with_default_codec() {
        let (client, store) = memory_client();
        client.add_object(0, "k", &test_data(), None).await.unwrap();

        let stored = store.get(0, "k").await.unwrap().unwrap();
        assert_eq!(stored, r#"{"id":1,"name":"a"}"#);

        let result: Option<TestData> = client.get_object(0, "k", None).await.unwrap();
        assert_eq!(result, Some(test_data()));
    }

    #[tokio::test]
    async fn test_missing_object_is_none_without_deserializing() {
        let (client, _) = memory_client();
        let deserializer = CountingDeserializer::default();

        let result: Option<TestData> = client
            .get_object(0, "missing", Some(&deserializer))
            .await
            .unwrap();

        assert_eq!(result, None);
        assert_eq!(deserializer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_custom_codecs_are_used_once_per_call() {
        let (client, _) = memory_client();
        let serializer = CountingSerializer::default();
        let deserializer = CountingDeserializer::default();

        client
            .add_object(0, "k", &test_data(), Some(&serializer))
            .await
            .unwrap();
        let result: Option<TestData> = client.get_object(0, "k", Some(&deserializer)).await.unwrap();

        assert_eq!(result, Some(test_data()));
        assert_eq!(serializer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(deserializer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_configured_serializer_is_the_default() {
        let store = Arc::new(MemoryStore::new());
        let mut settings = ResolvedClientSettings::new("redis://127.0.0.1/");
        settings.serializer_id = crate::codec::JSON_PRETTY.to_string();
        let client =
            RedisClient::with_store("pretty", &settings, &CodecRegistry::default(), store.clone())
                .unwrap();

        client.add_object(0, "k", &test_data(), None).await.unwrap();

        assert!(store.get(0, "k").await.unwrap().unwrap().contains('\n'));
        let result: Option<TestData> = client.get_object(0, "k", None).await.unwrap();
        assert_eq!(result, Some(test_data()));
    }

    #[tokio::test]
    async fn test_hash_roundtrip_and_delete() {
        let (client, _) = memory_client();
        client.add_hash_string(0, "h", "plain", "v").await.unwrap();
        client
            .add_hash_object(0, "h", "object", &test_data(), None)
            .await
            .unwrap();

        assert_eq!(
            client.get_hash_string(0, "h", "plain").await.unwrap(),
            Some("v".to_string())
        );
        let object: Option<TestData> = client.get_hash_object(0, "h", "object", None).await.unwrap();
        assert_eq!(object, Some(test_data()));

        client.delete_hash_field(0, "h", "plain").await.unwrap();
        assert_eq!(client.get_hash_string(0, "h", "plain").await.unwrap(), None);
        let missing: Option<TestData> = client.get_hash_object(0, "h", "nope", None).await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_delete_key() {
        let (client, _) = memory_client();
        client.add_string(0, "k", "v").await.unwrap();
        client.delete_key(0, "k").await.unwrap();
        assert_eq!(client.get_string(0, "k").await.unwrap(), None);
        client.delete_key(0, "k").await.unwrap();
    }

    #[tokio::test]
    async fn test_clean_only_touches_one_database() {
        let (client, _) = memory_client();
        client.add_string(1, "k", "one").await.unwrap();
        client.add_string(2, "k", "two").await.unwrap();

        client.clean(1).await.unwrap();

        assert_eq!(client.get_string(1, "k").await.unwrap(), None);
        assert_eq!(client.get_string(2, "k").await.unwrap(), Some("two".to_string()));
    }

    #[tokio::test]
    async fn test_store_errors_are_returned() {
        let (client, store) = memory_client();
        store.fail_with(redis::ErrorKind::IoError, "connection refused");

        let err = client.add_string(0, "k", "v").await.unwrap_err();
        assert!(matches!(err, Error::Redis(ref e) if e.kind() == redis::ErrorKind::IoError));
        assert!(matches!(client.get_string(0, "k").await, Err(Error::Redis(_))));
        assert!(matches!(client.clean(0).await, Err(Error::Redis(_))));
    }

    #[tokio::test]
    async fn test_undecodable_value_is_a_serialization_error() {
        let (client, _) = memory_client();
        client.add_string(0, "k", "not json").await.unwrap();

        let result: Result<Option<TestData>> = client.get_object(0, "k", None).await;
        assert!(matches!(result, Err(Error::Serialization(_))));
    }

    #[tokio::test]
    async fn test_unknown_codec_fails_construction() {
        let mut settings = ResolvedClientSettings::new("redis://127.0.0.1/");
        settings.deserializer_id = "xml".to_string();

        let err = RedisClient::connect("bad", &settings, &CodecRegistry::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::UnknownDeserializer(ref id) if id == "xml"));
    }

    #[tokio::test]
    async fn test_custom_codecs_are_used_once_per_hash_call() {
        let (client, _) = memory_client();
        let serializer = CountingSerializer::default();
        let deserializer = CountingDeserializer::default();

        client
            .add_hash_object(0, "h", "f", &test_data(), Some(&serializer))
            .await
            .unwrap();
        let result: Option<TestData> = client
            .get_hash_object(0, "h", "f", Some(&deserializer))
            .await
            .unwrap();
        let missing: Option<TestData> = client
            .get_hash_object(0, "h", "other", Some(&deserializer))
            .await
            .unwrap();

        assert_eq!(result, Some(test_data()));
        assert_eq!(missing, None);
        assert_eq!(serializer.calls.load(Ordering::SeqCst), 1);
        assert_eq!(deserializer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_each_operation_logs_one_info_event() {
        let (client, _) = memory_client();
        let capture = EventCapture::default();
        let _guard = capture.install();

        client.add_string(0, "k", "v").await.unwrap();
        let event = capture.single();
        assert_eq!(event.level, tracing::Level::INFO);
        assert_eq!(event.message, "add_string succeeded");
        assert_eq!(event.field("client"), Some("local"));
        assert_eq!(event.field("value"), Some("v"));

        client.get_string(0, "k").await.unwrap();
        let event = capture.single();
        assert_eq!(event.message, "get_string succeeded");
        assert_eq!(event.field("result"), Some(r#"Some("v")"#));

        client.add_object(0, "o", &test_data(), None).await.unwrap();
        assert_eq!(capture.single().message, "add_object succeeded");
        client.get_object::<TestData>(0, "o", None).await.unwrap();
        assert_eq!(capture.single().message, "get_object succeeded");
        client.add_hash_string(0, "h", "f", "v").await.unwrap();
        assert_eq!(capture.single().message, "add_hash_string succeeded");
        client
            .add_hash_object(0, "h", "o", &test_data(), None)
            .await
            .unwrap();
        assert_eq!(capture.single().message, "add_hash_object succeeded");
        client.get_hash_string(0, "h", "f").await.unwrap();
        assert_eq!(capture.single().message, "get_hash_string succeeded");
        client
            .get_hash_object::<TestData>(0, "h", "o", None)
            .await
            .unwrap();
        assert_eq!(capture.single().message, "get_hash_object succeeded");
        client.delete_hash_field(0, "h", "f").await.unwrap();
        assert_eq!(capture.single().message, "delete_hash_field succeeded");
        client.delete_key(0, "k").await.unwrap();
        assert_eq!(capture.single().message, "delete_key succeeded");
        client.clean(0).await.unwrap();
        let event = capture.single();
        assert_eq!(event.level, tracing::Level::INFO);
        assert_eq!(event.message, "clean succeeded");
    }

    #[tokio::test]
    async fn test_each_failure_logs_one_error_event() {
        let (client, store) = memory_client();
        store.fail_with(redis::ErrorKind::IoError, "connection refused");
        let capture = EventCapture::default();
        let _guard = capture.install();

        client.add_string(0, "k", "v").await.unwrap_err();
        let event = capture.single();
        assert_eq!(event.level, tracing::Level::ERROR);
        assert_eq!(event.message, "add_string failed");
        assert!(event.field("error").unwrap().contains("connection refused"));

        client.get_hash_string(0, "h", "f").await.unwrap_err();
        let event = capture.single();
        assert_eq!(event.level, tracing::Level::ERROR);
        assert_eq!(event.message, "get_hash_string failed");

        client.clean(0).await.unwrap_err();
        assert_eq!(capture.single().level, tracing::Level::ERROR);
    }

    #[tokio::test]
    async fn test_failed_object_write_logs_the_encoded_value() {
        let (client, store) = memory_client();
        store.fail_with(redis::ErrorKind::IoError, "connection refused");
        let capture = EventCapture::default();
        let _guard = capture.install();

        client
            .add_object(0, "k", &test_data(), None)
            .await
            .unwrap_err();
        let event = capture.single();
        assert_eq!(event.level, tracing::Level::ERROR);
        assert_eq!(event.field("value"), Some(r#"{"id":1,"name":"a"}"#));

        client
            .add_hash_object(0, "h", "f", &test_data(), None)
            .await
            .unwrap_err();
        let event = capture.single();
        assert_eq!(event.message, "add_hash_object failed");
        assert_eq!(event.field("value"), Some(r#"{"id":1,"name":"a"}"#));
    }

    #[tokio::test]
    async fn test_injected_store_has_no_server_connection() {
        let (client, _) = memory_client();
        assert!(matches!(
            client.connection(0).await,
            Err(Error::NoConnection(ref name)) if name == "local"
        ));
    }

    #[test]
    fn test_initialization_event_reports_settings() {
        let capture = EventCapture::default();
        let _guard = capture.install();
        let mut settings = ResolvedClientSettings::new("redis://127.0.0.1/");
        settings.interval = Duration::from_millis(1500);

        RedisClient::with_store(
            "local",
            &settings,
            &CodecRegistry::default(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();

        let event = capture.single();
        assert_eq!(event.message, "RedisClient has been initialized");
        assert_eq!(event.field("interval"), Some("1.5s"));
        assert_eq!(event.field("retry_count"), Some("30"));
    }
}
