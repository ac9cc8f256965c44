use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("failed to encode queue item: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("unknown connection {0}")]
    UnknownConnection(String),
    #[error("connection {0} is closed")]
    Closed(String),
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("{members} members but only {slots} starting slots")]
    TooManyPlayers { members: usize, slots: usize },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Why an incoming socket was turned away before joining a session.
#[derive(Debug, Error)]
pub enum ConnectError {
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("missing query parameter `{0}`")]
    MissingParam(&'static str),
    #[error("unknown session {0}")]
    UnknownSession(String),
    #[error("{member} is not a member of session {session}")]
    NotMember { session: String, member: String },
    #[error(transparent)]
    Store(#[from] StoreError),
}
