use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::error::ConnectError;
use crate::network::gateway::{ConnectionGateway, Outbound, WsGateway};
use crate::protocol::{ClientRequest, GameRequest, MemberId, RequestBody};
use crate::session::{run_session, SessionOutcome};
use crate::store::SessionStore;

/// Where a socket wants to go: `ws://host/?game=<session>&member=<member>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinParams {
    pub session_id: String,
    pub member_id: MemberId,
}

impl JoinParams {
    pub fn from_query(query: Option<&str>) -> Result<Self, ConnectError> {
        let mut session_id = None;
        let mut member_id = None;
        for pair in query.unwrap_or_default().split('&') {
            match pair.split_once('=') {
                Some(("game", value)) if !value.is_empty() => session_id = Some(value.to_string()),
                Some(("member", value)) if !value.is_empty() => member_id = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(Self {
            session_id: session_id.ok_or(ConnectError::MissingParam("game"))?,
            member_id: member_id.ok_or(ConnectError::MissingParam("member"))?,
        })
    }
}

/// WebSocket front door.
///
/// Each accepted socket gets a fresh connection id and two tasks:
///
/// 1. **Write task** forwards [`Outbound`] frames from the gateway to the
///    socket, closing it on [`Outbound::Close`].
/// 2. **Read loop** decodes client frames (msgpack binary or JSON text) and
///    appends them to the session queue. When the socket ends it enqueues a
///    `leave`.
///
/// Every connect also tries to start the session; the lease makes all but
/// the first attempt a no-op.
pub struct GameServer {
    config: Arc<GameConfig>,
    store: Arc<dyn SessionStore>,
    gateway: Arc<WsGateway>,
}

impl GameServer {
    pub fn new(config: Arc<GameConfig>, store: Arc<dyn SessionStore>) -> Self {
        Self {
            config,
            store,
            gateway: Arc::new(WsGateway::new()),
        }
    }

    pub async fn run(self) -> std::io::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;
        info!("Game server listening on ws://{}", self.config.bind_address);

        let server = Arc::new(self);
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            };
            let server = Arc::clone(&server);
            tokio::spawn(async move {
                if let Err(e) = server.handle_connection(stream, addr).await {
                    warn!("Connection from {} rejected: {}", addr, e);
                }
            });
        }
    }

    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<(), ConnectError> {
        let mut query: Option<String> = None;
        let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
            query = request.uri().query().map(str::to_string);
            Ok(response)
        };
        let ws_stream = accept_hdr_async(stream, callback).await?;
        let (mut ws_write, mut ws_read) = ws_stream.split();

        let join = match self.admit(query.as_deref()).await {
            Ok(join) => join,
            Err(e) => {
                let _ = ws_write.close().await;
                return Err(e);
            }
        };
        let connection_id = Uuid::new_v4().to_string();
        info!(
            session_id = %join.session_id,
            "Member {} connected from {} as {}",
            join.member_id,
            addr,
            connection_id
        );

        // Channel: session -> gateway -> write task -> WebSocket
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Outbound>();
        self.gateway.register(connection_id.clone(), out_tx);

        // ── Write task ──────────────────────────────────────────────
        let write_id = connection_id.clone();
        tokio::spawn(async move {
            while let Some(outbound) = out_rx.recv().await {
                match outbound {
                    Outbound::Frame(bytes) => {
                        if let Err(e) = ws_write.send(Message::Binary(bytes.into())).await {
                            debug!("Failed to write to {}: {}", write_id, e);
                            break;
                        }
                    }
                    Outbound::Close => {
                        let _ = ws_write.close().await;
                        break;
                    }
                }
            }
            debug!("Write task for {} shutting down", write_id);
        });

        let enter = GameRequest::new(
            connection_id.clone(),
            RequestBody::Enter {
                member_id: join.member_id.clone(),
            },
        );
        self.store.enqueue(&join.session_id, &enter).await?;
        self.spawn_session(&join.session_id).await?;

        // ── Read loop ───────────────────────────────────────────────
        while let Some(result) = ws_read.next().await {
            let msg = match result {
                Ok(msg) => msg,
                Err(e) => {
                    debug!("WebSocket read error on {}: {}", connection_id, e);
                    break;
                }
            };
            if msg.is_close() {
                break;
            }
            let Some(request) = decode_client_frame(msg) else {
                continue;
            };
            let request = GameRequest::new(connection_id.clone(), request.into());
            if let Err(e) = self.store.enqueue(&join.session_id, &request).await {
                error!(session_id = %join.session_id, "Cannot enqueue request: {}", e);
                break;
            }
        }

        info!(session_id = %join.session_id, "Connection {} closed", connection_id);
        self.gateway.unregister(&connection_id);
        self.enqueue_leave(&join.session_id, connection_id).await
    }

    /// Queue a `leave` unless the session already finished; a retired
    /// session has nobody left to drain its queue.
    async fn enqueue_leave(&self, session_id: &str, connection_id: String) -> Result<(), ConnectError> {
        if self.store.load_members(session_id).await?.is_none() {
            debug!(session_id, "Session retired; not queueing leave for {}", connection_id);
            return Ok(());
        }
        let leave = GameRequest::new(connection_id, RequestBody::Leave);
        self.store.enqueue(session_id, &leave).await?;
        Ok(())
    }

    /// The session must exist and list the member.
    async fn admit(&self, query: Option<&str>) -> Result<JoinParams, ConnectError> {
        let join = JoinParams::from_query(query)?;
        let members = self
            .store
            .load_members(&join.session_id)
            .await?
            .ok_or_else(|| ConnectError::UnknownSession(join.session_id.clone()))?;
        if !members.contains(&join.member_id) {
            return Err(ConnectError::NotMember {
                session: join.session_id,
                member: join.member_id,
            });
        }
        Ok(join)
    }

    async fn spawn_session(&self, session_id: &str) -> Result<(), ConnectError> {
        let members = self
            .store
            .load_members(session_id)
            .await?
            .ok_or_else(|| ConnectError::UnknownSession(session_id.to_string()))?;

        let session_id = session_id.to_string();
        let store = Arc::clone(&self.store);
        let gateway: Arc<dyn ConnectionGateway> = self.gateway.clone();
        let config = Arc::clone(&self.config);
        tokio::spawn(async move {
            match run_session(&session_id, &members, store, gateway, config).await {
                Ok(SessionOutcome::Superseded) => {}
                Ok(SessionOutcome::Finished { score }) => {
                    info!(session_id = %session_id, ?score, "Session finished");
                }
                Err(e) => error!(session_id = %session_id, "Session failed: {}", e),
            }
        });
        Ok(())
    }
}

/// Binary frames are msgpack, text frames JSON. Anything else, or anything
/// that fails to decode, yields `None`.
fn decode_client_frame(msg: Message) -> Option<ClientRequest> {
    let decoded = if msg.is_binary() {
        rmp_serde::from_slice::<ClientRequest>(&msg.into_data()).map_err(|e| e.to_string())
    } else if msg.is_text() {
        serde_json::from_slice::<ClientRequest>(&msg.into_data()).map_err(|e| e.to_string())
    } else {
        return None;
    };
    match decoded {
        Ok(request) => Some(request),
        Err(e) => {
            warn!("Failed to decode client request: {}", e);
            None
        }
    }
}
