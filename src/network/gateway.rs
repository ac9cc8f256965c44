use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::GatewayError;
use crate::protocol::ServerMessage;

/// Pushes messages to, or forcibly closes, one client connection.
#[async_trait]
pub trait ConnectionGateway: Send + Sync {
    async fn push(&self, connection_id: &str, message: &ServerMessage) -> Result<(), GatewayError>;

    async fn drop_connection(&self, connection_id: &str) -> Result<(), GatewayError>;
}

/// What the per-socket write task should do next.
#[derive(Debug)]
pub enum Outbound {
    Frame(Vec<u8>),
    Close,
}

/// Channel for sending serialized frames to one socket's write task.
pub type OutboundTx = mpsc::UnboundedSender<Outbound>;

/// Gateway over the WebSocket server's write tasks. Messages are encoded
/// as named msgpack maps.
#[derive(Debug, Default)]
pub struct WsGateway {
    connections: Mutex<HashMap<String, OutboundTx>>,
}

impl WsGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, connection_id: String, tx: OutboundTx) {
        self.connections.lock().insert(connection_id, tx);
    }

    pub fn unregister(&self, connection_id: &str) {
        self.connections.lock().remove(connection_id);
    }

    fn sender(&self, connection_id: &str) -> Result<OutboundTx, GatewayError> {
        self.connections
            .lock()
            .get(connection_id)
            .cloned()
            .ok_or_else(|| GatewayError::UnknownConnection(connection_id.to_string()))
    }
}

#[async_trait]
impl ConnectionGateway for WsGateway {
    async fn push(&self, connection_id: &str, message: &ServerMessage) -> Result<(), GatewayError> {
        let bytes = rmp_serde::to_vec_named(message)?;
        let tx = self.sender(connection_id)?;
        if tx.send(Outbound::Frame(bytes)).is_err() {
            warn!("Connection {} closed; dropping its sender", connection_id);
            self.unregister(connection_id);
            return Err(GatewayError::Closed(connection_id.to_string()));
        }
        Ok(())
    }

    async fn drop_connection(&self, connection_id: &str) -> Result<(), GatewayError> {
        let tx = self.connections.lock().remove(connection_id);
        match tx {
            Some(tx) => {
                debug!("Closing connection {}", connection_id);
                // The write task may already be gone; either way it is closed.
                let _ = tx.send(Outbound::Close);
                Ok(())
            }
            None => Err(GatewayError::UnknownConnection(connection_id.to_string())),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn push_encodes_msgpack_frame() {
        let gateway = WsGateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("c1".to_string(), tx);

        gateway
            .push("c1", &ServerMessage::Energy { energy: 3 })
            .await
            .unwrap();
        match rx.recv().await {
            Some(Outbound::Frame(bytes)) => {
                let decoded: ServerMessage = rmp_serde::from_slice(&bytes).unwrap();
                assert!(matches!(decoded, ServerMessage::Energy { energy: 3 }));
            }
            other => panic!("unexpected outbound {:?}", other),
        }
    }

    #[tokio::test]
    async fn drop_sends_close_and_forgets_connection() {
        let gateway = WsGateway::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        gateway.register("c1".to_string(), tx);

        gateway.drop_connection("c1").await.unwrap();
        assert!(matches!(rx.recv().await, Some(Outbound::Close)));
        assert!(matches!(
            gateway.push("c1", &ServerMessage::Energy { energy: 0 }).await,
            Err(GatewayError::UnknownConnection(_))
        ));
    }

    #[tokio::test]
    async fn push_to_closed_channel_reports_closed() {
        let gateway = WsGateway::new();
        let (tx, rx) = mpsc::unbounded_channel();
        gateway.register("c1".to_string(), tx);
        drop(rx);
        assert!(matches!(
            gateway.push("c1", &ServerMessage::Energy { energy: 0 }).await,
            Err(GatewayError::Closed(_))
        ));
    }
}
