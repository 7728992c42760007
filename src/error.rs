use thiserror::Error;

#[derive(Error, Debug)]
pub enum TickwireError {
    #[error("WebSocket connection error: {0}")]
    WebSocketError(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("URL parsing error: {0}")]
    UrlError(#[from] url::ParseError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("connection closed unexpectedly")]
    ConnectionClosed,

    #[error("transport is not open")]
    NotConnected,

    #[error("metrics server error: {0}")]
    MetricsError(String),
}
