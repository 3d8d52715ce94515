//! Pluggable conversion between structured values and their string form.
//!
//! Typed values are first converted to a [`serde_json::Value`] by the client,
//! so serializers and deserializers stay object safe and can be selected at
//! runtime by identifier through a [`CodecRegistry`].

use std::{collections::HashMap, fmt, sync::Arc};

use serde_json::Value;

use crate::error::{Error, Result};

/// Identifier of the built-in compact JSON codec.
pub const JSON: &str = "json";
/// Identifier of the built-in pretty-printed JSON serializer.
pub const JSON_PRETTY: &str = "json-pretty";

/// Encodes a structured value into the string stored in Redis.
pub trait Serializer: Send + Sync + fmt::Debug {
    fn serialize(&self, value: &Value) -> std::result::Result<String, serde_json::Error>;
}

/// Decodes a string read from Redis into a structured value.
pub trait Deserializer: Send + Sync + fmt::Debug {
    fn deserialize(&self, raw: &str) -> std::result::Result<Value, serde_json::Error>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn serialize(&self, value: &Value) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PrettyJsonSerializer;

impl Serializer for PrettyJsonSerializer {
    fn serialize(&self, value: &Value) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string_pretty(value)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct JsonDeserializer;

impl Deserializer for JsonDeserializer {
    fn deserialize(&self, raw: &str) -> std::result::Result<Value, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

pub type SerializerFactory = Arc<dyn Fn() -> Arc<dyn Serializer> + Send + Sync>;
pub type DeserializerFactory = Arc<dyn Fn() -> Arc<dyn Deserializer> + Send + Sync>;

/// Maps codec identifiers used in settings files to factories.
///
/// `CodecRegistry::default()` knows `"json"` (both directions) and
/// `"json-pretty"` (serializer only). Custom codecs are added with
/// [`CodecRegistry::with_serializer`] and [`CodecRegistry::with_deserializer`]
/// before the factory is built.
#[derive(Clone)]
pub struct CodecRegistry {
    serializers: HashMap<String, SerializerFactory>,
    deserializers: HashMap<String, DeserializerFactory>,
}

impl CodecRegistry {
    /// Registry without any codecs, not even the JSON built-ins.
    pub fn empty() -> Self {
        Self {
            serializers: HashMap::new(),
            deserializers: HashMap::new(),
        }
    }

    pub fn with_serializer<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Serializer> + Send + Sync + 'static,
    {
        self.serializers.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn with_deserializer<F>(mut self, id: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn Deserializer> + Send + Sync + 'static,
    {
        self.deserializers.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn serializer(&self, id: &str) -> Result<Arc<dyn Serializer>> {
        self.serializers
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownSerializer(id.to_string()))
    }

    pub fn deserializer(&self, id: &str) -> Result<Arc<dyn Deserializer>> {
        self.deserializers
            .get(id)
            .map(|factory| factory())
            .ok_or_else(|| Error::UnknownDeserializer(id.to_string()))
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::empty()
            .with_serializer(JSON, || Arc::new(JsonSerializer))
            .with_serializer(JSON_PRETTY, || Arc::new(PrettyJsonSerializer))
            .with_deserializer(JSON, || Arc::new(JsonDeserializer))
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut serializers: Vec<_> = self.serializers.keys().collect();
        let mut deserializers: Vec<_> = self.deserializers.keys().collect();
        serializers.sort();
        deserializers.sort();
        f.debug_struct("CodecRegistry")
            .field("serializers", &serializers)
            .field("deserializers", &deserializers)
            .finish()
    }
}
