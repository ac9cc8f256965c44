use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::game::board::Board;
use crate::network::gateway::ConnectionGateway;
use crate::protocol::{ConnectionId, ServerMessage, TileSync};

struct Pending {
    board: Arc<Board>,
    recipients: Vec<ConnectionId>,
}

struct BroadcastState {
    /// Last board whose diff was handed to a transmission.
    last: Arc<Board>,
    sending: bool,
    /// Only the most recent request survives while sending.
    pending: Option<Pending>,
}

impl BroadcastState {
    /// Decide what to transmit for `board`, if anything.
    fn begin(
        &mut self,
        board: Arc<Board>,
        recipients: Vec<ConnectionId>,
    ) -> Option<(Vec<TileSync>, Vec<ConnectionId>)> {
        if Arc::ptr_eq(&self.last, &board) {
            return None;
        }
        if self.sending {
            self.pending = Some(Pending { board, recipients });
            return None;
        }

        let changes = self.last.diff(&board);
        self.last = board;
        if changes.is_empty() {
            return None;
        }
        self.sending = true;
        Some((changes, recipients))
    }
}

/// Single-flight board diff broadcaster.
///
/// At most one `changed` transmission is in flight per session. Boards
/// offered while one is in flight collapse into a single pending request,
/// sent as one diff against the last transmitted board once the current
/// send finishes. Clients therefore only ever move forward to newer states.
pub struct DiffBroadcaster {
    session_id: String,
    gateway: Arc<dyn ConnectionGateway>,
    state: Arc<Mutex<BroadcastState>>,
    idle: Arc<Notify>,
}

impl DiffBroadcaster {
    pub fn new(
        session_id: impl Into<String>,
        gateway: Arc<dyn ConnectionGateway>,
        initial: Arc<Board>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            gateway,
            state: Arc::new(Mutex::new(BroadcastState {
                last: initial,
                sending: false,
                pending: None,
            })),
            idle: Arc::new(Notify::new()),
        }
    }

    /// Offer the current board. Returns immediately; the send itself runs on
    /// a spawned task.
    pub fn broadcast(&self, board: Arc<Board>, recipients: Vec<ConnectionId>) {
        let first = self.state.lock().begin(board, recipients);
        let Some(first) = first else {
            return;
        };

        let session_id = self.session_id.clone();
        let gateway = Arc::clone(&self.gateway);
        let state = Arc::clone(&self.state);
        let idle = Arc::clone(&self.idle);

        tokio::spawn(async move {
            let mut next = Some(first);
            while let Some((changes, recipients)) = next.take() {
                transmit(&session_id, gateway.as_ref(), changes, &recipients).await;

                next = {
                    let mut guard = state.lock();
                    guard.sending = false;
                    match guard.pending.take() {
                        Some(pending) => {
                            debug!(session_id = %session_id, "Processing coalesced board change");
                            guard.begin(pending.board, pending.recipients)
                        }
                        None => None,
                    }
                };
            }
            idle.notify_waiters();
        });
    }

    /// The board every recipient converges on from here: the last one whose
    /// diff was handed to a transmission. A full snapshot taken from this
    /// board stays consistent with every later diff.
    pub fn last(&self) -> Arc<Board> {
        Arc::clone(&self.state.lock().last)
    }

    pub fn is_sending(&self) -> bool {
        self.state.lock().sending
    }

    /// Wait until no transmission is in flight.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_sending() {
                return;
            }
            notified.await;
        }
    }
}

async fn transmit(
    session_id: &str,
    gateway: &dyn ConnectionGateway,
    changes: Vec<TileSync>,
    recipients: &[ConnectionId],
) {
    debug!(session_id, "Broadcasting {} changed tiles", changes.len());
    let message = ServerMessage::Changed { tiles: changes };
    let results = join_all(recipients.iter().map(|id| gateway.push(id, &message))).await;
    for (id, result) in recipients.iter().zip(results) {
        if let Err(e) = result {
            warn!(session_id, "Cannot send board changes to {}: {}", id, e);
        }
    }
}
