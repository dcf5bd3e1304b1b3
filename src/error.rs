use thiserror::Error;

/// Errors surfaced by [`crate::BatchConsumer::handle`].
///
/// Neither variant is caught by the consumer; the caller decides whether to
/// retry, drop or crash.
#[derive(Error, Debug)]
pub enum ConsumerError {
    #[error("delivered batch contains no messages")]
    EmptyBatch,
    #[error("log sink rejected the record: {0}")]
    SinkUnavailable(#[from] SinkError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    #[error("sink is unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised while loading the trigger manifest or resolving a binding's
/// connection setting.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read trigger manifest {path}: {source}")]
    ReadManifest {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid trigger manifest: {0}")]
    ParseManifest(#[from] toml::de::Error),
    #[error("trigger manifest declares no [[trigger]] entries")]
    NoTriggers,
    #[error("trigger entry has an empty {0}")]
    EmptyField(&'static str),
    #[error("connection setting {0} is not set")]
    MissingSetting(String),
    #[error("connection setting {setting} is malformed: {reason}")]
    MalformedConnection { setting: String, reason: String },
}
