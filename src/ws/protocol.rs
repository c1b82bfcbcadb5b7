//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::physics::Vec2;
use crate::game::powerup::PadState;

/// Room identifier chosen by the creating client (or generated)
pub type RoomId = String;

/// Server-side handle of one WebSocket connection
pub type ConnectionId = Uuid;

/// The two sides of a match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Team {
    Blue,
    Red,
}

impl Team {
    pub fn other(self) -> Team {
        match self {
            Team::Blue => Team::Red,
            Team::Red => Team::Blue,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GameType {
    Classic,
    WithPowerUps,
}

/// Room lifecycle: WaitingPlayers -> Playing -> FinishedGame -> WaitingPlayers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    WaitingPlayers,
    Playing,
    FinishedGame,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Winner {
    Blue,
    Red,
    Draw,
}

impl Winner {
    /// Higher score wins, equal scores are a draw
    pub fn from_score(score: &Score) -> Self {
        match score.blue.cmp(&score.red) {
            std::cmp::Ordering::Greater => Winner::Blue,
            std::cmp::Ordering::Less => Winner::Red,
            std::cmp::Ordering::Equal => Winner::Draw,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    pub blue: u32,
    pub red: u32,
}

impl Score {
    pub fn add_goal(&mut self, team: Team) {
        match team {
            Team::Blue => self.blue += 1,
            Team::Red => self.red += 1,
        }
    }

    pub fn reached(&self, goals_to_win: u32) -> bool {
        self.blue >= goals_to_win || self.red >= goals_to_win
    }
}

/// Room settings sent with `createRoom`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewRoom {
    /// Client-chosen id; generated when absent
    #[serde(default)]
    pub id: Option<RoomId>,
    #[serde(default)]
    pub name: String,
    pub number_of_players: u8,
    pub type_of_game: GameType,
    pub goals_to_win: u32,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMsg {
    /// Register a new room
    CreateRoom(NewRoom),

    /// Subscribe to lobby updates and receive every room
    JoinLobby,

    #[serde(rename_all = "camelCase")]
    JoinTeam {
        room: RoomId,
        team: Team,
        username: String,
    },

    /// Subscribe to a room's events (and reconnect a rostered player)
    #[serde(rename_all = "camelCase")]
    JoinRoom { room: RoomId, username: String },

    /// Owner-only match start
    #[serde(rename_all = "camelCase")]
    StartGame { room: RoomId, username: String },

    /// Movement, boost or shot input, e.g. "up", "boostLeft", "shoot"
    #[serde(rename_all = "camelCase")]
    Move {
        room: RoomId,
        username: String,
        #[serde(rename = "move")]
        action: String,
    },

    /// Chat line relayed to the room
    #[serde(rename_all = "camelCase")]
    Message {
        room: RoomId,
        text: String,
        author: String,
    },

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMsg {
    /// Lobby: a room was registered
    RoomCreated(RoomSummary),

    /// Lobby and room: rosters, player status or room status changed
    RoomUpdated(RoomSummary),

    /// Lobby and room: the room no longer exists
    RoomRemoved { id: RoomId },

    /// Every known room, sent on `joinLobby`
    AllRooms { rooms: Vec<RoomSummary> },

    /// Reply to the creator of a room
    RoomCreatedAck { id: RoomId },

    JoinedToTeam(RoomSummary),

    JoinedRoom(RoomSummary),

    GameStarted(RoomSummary),

    /// Per-tick snapshot
    GameState(GameStateMsg),

    GameFinished { winner: Winner, score: Score },

    /// Room recycled after the post-match cooldown
    AwaitingPlayersAgain(RoomSummary),

    #[serde(rename_all = "camelCase")]
    NewMessage {
        id: Uuid,
        text: String,
        author: String,
        sent_at: DateTime<Utc>,
    },

    /// Error message
    Error { reason: String },

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

impl ServerMsg {
    pub fn error(reason: impl ToString) -> Self {
        ServerMsg::Error {
            reason: reason.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStats {
    pub goals: u32,
}

/// Rostered player as shown to clients
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerSummary {
    pub socket_id: ConnectionId,
    pub username: String,
    pub stats: PlayerStats,
    pub status: PlayerStatus,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamSummary {
    pub players: Vec<PlayerSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TeamsSummary {
    pub blue: TeamSummary,
    pub red: TeamSummary,
}

/// Room configuration plus rosters and live status
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub number_of_players: u8,
    pub type_of_game: GameType,
    pub goals_to_win: u32,
    pub owner: String,
    pub teams: TeamsSummary,
    pub status: RoomStatus,
    pub score: Score,
    pub winner: Winner,
}

/// One player's entry in a game state snapshot
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerFrame {
    pub position: Vec2,
    pub team: Team,
    pub boost_level: u32,
    pub goals: u32,
}

/// Broadcast snapshot of a running match
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateMsg {
    pub tick: u64,
    pub status: RoomStatus,
    /// True during the freeze window after a goal
    pub resetting: bool,
    pub score: Score,
    pub winner: Winner,
    /// Keyed by username
    pub players: BTreeMap<String, PlayerFrame>,
    pub ball_position: Vec2,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pads: Option<Vec<PadState>>,
}
