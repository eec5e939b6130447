use thiserror::Error;

/// Errors raised while encoding or decoding event payloads.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("unsupported event type `{0}`")]
    UnknownType(String),

    #[error("event payload for {type_name} could not be (de)serialized: {source}")]
    Json {
        type_name: String,
        #[source]
        source: serde_json::Error,
    },
}
