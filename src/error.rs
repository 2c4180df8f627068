//! Error types for the nslink follower

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NsLinkError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tungstenite::Error>),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Handshake error: {0}")]
    Handshake(String),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<tungstenite::Error> for NsLinkError {
    fn from(err: tungstenite::Error) -> Self {
        NsLinkError::WebSocket(Box::new(err))
    }
}
