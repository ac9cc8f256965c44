use serde::{Deserialize, Serialize};

use crate::game::board::Board;
use crate::game::costs::CostTable;

// ── Core type aliases ──────────────────────────────────────────────

/// Stable 1-based identity of a player within one session.
pub type PlayerIndex = u32;
pub type ConnectionId = String;
pub type MemberId = String;

// ── Geometry ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct Pos {
    pub x: i32,
    pub y: i32,
}

impl Pos {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn manhattan(&self, other: &Pos) -> u32 {
        self.x.abs_diff(other.x) + self.y.abs_diff(other.y)
    }

    /// The four orthogonal neighbours; may fall outside the board.
    pub fn neighbours(&self) -> [Pos; 4] {
        [
            Pos::new(self.x, self.y + 1),
            Pos::new(self.x, self.y - 1),
            Pos::new(self.x + 1, self.y),
            Pos::new(self.x - 1, self.y),
        ]
    }
}

// ── Tile attributes ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Attribute {
    Defence,
    Offence,
    Productivity,
    AttackRange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValueMap {
    pub defence: u32,
    pub offence: u32,
    pub productivity: u32,
    pub attack_range: u32,
}

impl ValueMap {
    pub const ZERO: ValueMap = ValueMap {
        defence: 0,
        offence: 0,
        productivity: 0,
        attack_range: 0,
    };

    /// Value-map of a freshly captured tile.
    pub const BASE: ValueMap = ValueMap {
        defence: 2,
        offence: 1,
        productivity: 1,
        attack_range: 1,
    };

    pub fn get(&self, attribute: Attribute) -> u32 {
        match attribute {
            Attribute::Defence => self.defence,
            Attribute::Offence => self.offence,
            Attribute::Productivity => self.productivity,
            Attribute::AttackRange => self.attack_range,
        }
    }

    pub fn get_mut(&mut self, attribute: Attribute) -> &mut u32 {
        match attribute {
            Attribute::Defence => &mut self.defence,
            Attribute::Offence => &mut self.offence,
            Attribute::Productivity => &mut self.productivity,
            Attribute::AttackRange => &mut self.attack_range,
        }
    }

    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }

    pub fn total(&self) -> u32 {
        self.defence + self.offence + self.productivity + self.attack_range
    }
}

// ── Stage ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Stage {
    Wait,
    Running,
    End,
}

// ── Requests (queue → session) ─────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TileActionKind {
    New,
    DefenceUp,
    OffenceUp,
    ProductivityUp,
    AttackRangeUp,
}

impl TileActionKind {
    /// The attribute an upgrade raises; `None` for `New`.
    pub fn attribute(&self) -> Option<Attribute> {
        match self {
            TileActionKind::New => None,
            TileActionKind::DefenceUp => Some(Attribute::Defence),
            TileActionKind::OffenceUp => Some(Attribute::Offence),
            TileActionKind::ProductivityUp => Some(Attribute::Productivity),
            TileActionKind::AttackRangeUp => Some(Attribute::AttackRange),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    Tile { kind: TileActionKind, pos: Pos },
    Attack { from: Pos, to: Pos },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackTarget {
    pub from: Pos,
    pub to: Pos,
}

/// Body of a queued request, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RequestBody {
    #[serde(rename_all = "camelCase")]
    Enter { member_id: MemberId },
    Leave,
    Load,
    New(Pos),
    DefenceUp(Pos),
    OffenceUp(Pos),
    ProductivityUp(Pos),
    AttackRangeUp(Pos),
    Attack(AttackTarget),
}

impl RequestBody {
    /// Gameplay requests map to an [`Action`]; administrative ones do not.
    pub fn action(&self) -> Option<Action> {
        let tile = |kind, pos: &Pos| Some(Action::Tile { kind, pos: *pos });
        match self {
            RequestBody::Enter { .. } | RequestBody::Leave | RequestBody::Load => None,
            RequestBody::New(pos) => tile(TileActionKind::New, pos),
            RequestBody::DefenceUp(pos) => tile(TileActionKind::DefenceUp, pos),
            RequestBody::OffenceUp(pos) => tile(TileActionKind::OffenceUp, pos),
            RequestBody::ProductivityUp(pos) => tile(TileActionKind::ProductivityUp, pos),
            RequestBody::AttackRangeUp(pos) => tile(TileActionKind::AttackRangeUp, pos),
            RequestBody::Attack(target) => Some(Action::Attack {
                from: target.from,
                to: target.to,
            }),
        }
    }
}

/// A connection-scoped request as it sits in the session queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRequest {
    pub connection_id: ConnectionId,
    #[serde(flatten)]
    pub body: RequestBody,
}

impl GameRequest {
    pub fn new(connection_id: impl Into<ConnectionId>, body: RequestBody) -> Self {
        Self {
            connection_id: connection_id.into(),
            body,
        }
    }
}

// ── Client → Server messages ───────────────────────────────────────

/// What a client may send over its socket. `enter`/`leave` are produced by
/// the gateway from connect/disconnect events and are never accepted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientRequest {
    Load,
    New(Pos),
    DefenceUp(Pos),
    OffenceUp(Pos),
    ProductivityUp(Pos),
    AttackRangeUp(Pos),
    Attack(AttackTarget),
}

impl From<ClientRequest> for RequestBody {
    fn from(request: ClientRequest) -> Self {
        match request {
            ClientRequest::Load => RequestBody::Load,
            ClientRequest::New(pos) => RequestBody::New(pos),
            ClientRequest::DefenceUp(pos) => RequestBody::DefenceUp(pos),
            ClientRequest::OffenceUp(pos) => RequestBody::OffenceUp(pos),
            ClientRequest::ProductivityUp(pos) => RequestBody::ProductivityUp(pos),
            ClientRequest::AttackRangeUp(pos) => RequestBody::AttackRangeUp(pos),
            ClientRequest::Attack(target) => RequestBody::Attack(target),
        }
    }
}

// ── Server → Client messages ───────────────────────────────────────

/// Public view of a player: what other clients are allowed to see.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerInfo {
    pub index: PlayerIndex,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TileSync {
    pub x: i32,
    pub y: i32,
    pub owner: Option<PlayerIndex>,
    pub value_map: ValueMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub owner: PlayerIndex,
    pub tiles: u32,
    pub power: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReply {
    pub me: PlayerInfo,
    pub players: Vec<PlayerInfo>,
    pub board: Board,
    pub stage: Stage,
    pub age: u64,
    pub energy: u64,
    pub costs: CostTable,
}

/// Server-to-client message wrapper, tagged by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    /// A newbie joined; sent to everyone else.
    Enter { player: PlayerInfo },
    /// A player left; sent to everyone still connected.
    Leave { player: PlayerInfo },
    /// Full snapshot for the requester only.
    Load(Box<LoadReply>),
    /// Countdown update, personalised with the recipient's energy.
    Stage { stage: Stage, age: u64, energy: u64 },
    Changed { tiles: Vec<TileSync> },
    Attack { from: Pos, to: Pos, damage: u32 },
    /// Spender's balance after a successful action.
    Energy { energy: u64 },
    End { score: Vec<ScoreEntry> },
}
