use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Unknown serializer: {0}")]
    UnknownSerializer(String),

    #[error("Unknown deserializer: {0}")]
    UnknownDeserializer(String),

    #[error("There are no RedisClients defined in the factory yet")]
    NoClients,

    #[error("There are {0} RedisClients defined in the factory, please provide a name")]
    AmbiguousClient(usize),

    #[error("There is no '{0}' RedisClient defined in the factory")]
    ClientNotFound(String),

    #[error("RedisClient with a name '{0}' already exists")]
    DuplicateClient(String),

    #[error("RedisClient '{0}' is not backed by a Redis server")]
    NoConnection(String),
}
