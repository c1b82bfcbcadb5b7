//! Room record: configuration, team rosters and admission rules

use crate::ws::protocol::{
    ConnectionId, GameType, NewRoom, PlayerStats, PlayerStatus, PlayerSummary, RoomId,
    RoomStatus, RoomSummary, Score, Team, TeamSummary, TeamsSummary, Winner,
};

/// Allowed values for `numberOfPlayers`
pub const ROOM_SIZES: [u8; 4] = [2, 4, 6, 8];

/// Room and team errors, reported to the offending connection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoomError {
    #[error("Room does not exist")]
    RoomNotFound,

    #[error("Room already exists")]
    RoomAlreadyExists,

    #[error("Invalid room config: {0}")]
    InvalidRoomConfig(&'static str),

    #[error("Game already started")]
    GameAlreadyStarted,

    #[error("Team is full")]
    TeamFull,

    #[error("Username already exists in this team")]
    DuplicateUsernameInTeam,

    #[error("Username already exists in some team")]
    DuplicateUsernameAcrossTeams,

    #[error("Only the room owner can do that")]
    Unauthorized,

    #[error("Player is not in a running match")]
    PlayerNotInMatch,
}

/// Validated, immutable room settings
#[derive(Debug, Clone)]
pub struct RoomConfig {
    pub id: RoomId,
    pub name: String,
    pub number_of_players: u8,
    pub type_of_game: GameType,
    pub goals_to_win: u32,
    pub owner: String,
}

impl RoomConfig {
    /// Validate a `createRoom` request on behalf of `owner`
    pub fn from_request(request: NewRoom, owner: String) -> Result<Self, RoomError> {
        if !ROOM_SIZES.contains(&request.number_of_players) {
            return Err(RoomError::InvalidRoomConfig("numberOfPlayers must be 2, 4, 6 or 8"));
        }
        if request.goals_to_win == 0 {
            return Err(RoomError::InvalidRoomConfig("goalsToWin must be at least 1"));
        }

        let id = request
            .id
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let name = if request.name.trim().is_empty() {
            id.clone()
        } else {
            request.name
        };

        Ok(Self {
            id,
            name,
            number_of_players: request.number_of_players,
            type_of_game: request.type_of_game,
            goals_to_win: request.goals_to_win,
            owner,
        })
    }
}

/// A rostered player
#[derive(Debug, Clone)]
pub struct Player {
    pub socket_id: ConnectionId,
    pub username: String,
    pub goals: u32,
    pub status: PlayerStatus,
}

impl Player {
    fn new(username: String, socket_id: ConnectionId) -> Self {
        Self {
            socket_id,
            username,
            goals: 0,
            status: PlayerStatus::Online,
        }
    }

    fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            socket_id: self.socket_id,
            username: self.username.clone(),
            stats: PlayerStats { goals: self.goals },
            status: self.status,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub config: RoomConfig,
    pub status: RoomStatus,
    pub score: Score,
    pub winner: Winner,
    blue: Vec<Player>,
    red: Vec<Player>,
}

impl Room {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config,
            status: RoomStatus::WaitingPlayers,
            score: Score::default(),
            winner: Winner::Draw,
            blue: Vec::new(),
            red: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Players per team
    pub fn team_capacity(&self) -> usize {
        self.config.number_of_players as usize / 2
    }

    pub fn team(&self, team: Team) -> &[Player] {
        match team {
            Team::Blue => &self.blue,
            Team::Red => &self.red,
        }
    }

    fn team_mut(&mut self, team: Team) -> &mut Vec<Player> {
        match team {
            Team::Blue => &mut self.blue,
            Team::Red => &mut self.red,
        }
    }

    pub fn usernames(&self, team: Team) -> Vec<String> {
        self.team(team).iter().map(|p| p.username.clone()).collect()
    }

    pub fn roster_size(&self) -> usize {
        self.blue.len() + self.red.len()
    }

    pub fn is_full(&self) -> bool {
        self.roster_size() == self.config.number_of_players as usize
    }

    fn player_mut(&mut self, username: &str) -> Option<&mut Player> {
        self.blue
            .iter_mut()
            .chain(self.red.iter_mut())
            .find(|p| p.username == username)
    }

    /// Add a player to a team. Checks run in a fixed order and nothing changes on error.
    pub fn admit(
        &mut self,
        team: Team,
        username: &str,
        socket_id: ConnectionId,
    ) -> Result<(), RoomError> {
        if self.status != RoomStatus::WaitingPlayers {
            return Err(RoomError::GameAlreadyStarted);
        }
        let capacity = self.team_capacity();
        let roster = self.team(team);
        if roster.len() >= capacity {
            return Err(RoomError::TeamFull);
        }
        if roster.iter().any(|p| p.username == username) {
            return Err(RoomError::DuplicateUsernameInTeam);
        }
        if self.team(team.other()).iter().any(|p| p.username == username) {
            return Err(RoomError::DuplicateUsernameAcrossTeams);
        }

        self.team_mut(team)
            .push(Player::new(username.to_string(), socket_id));
        Ok(())
    }

    /// Rebind a rostered player to a new connection and mark them online.
    /// Rosters are untouched. Returns true if the player was found.
    pub fn reconnect(&mut self, username: &str, socket_id: ConnectionId) -> bool {
        match self.player_mut(username) {
            Some(player) => {
                player.status = PlayerStatus::Online;
                player.socket_id = socket_id;
                true
            }
            None => false,
        }
    }

    /// Mark every player bound to a closed connection offline.
    /// Returns true if anything changed.
    pub fn mark_offline(&mut self, socket_id: ConnectionId) -> bool {
        let mut changed = false;
        for player in self.blue.iter_mut().chain(self.red.iter_mut()) {
            if player.socket_id == socket_id && player.status == PlayerStatus::Online {
                player.status = PlayerStatus::Offline;
                changed = true;
            }
        }
        changed
    }

    pub fn credit_goal(&mut self, username: &str) {
        if let Some(player) = self.player_mut(username) {
            player.goals += 1;
        }
    }

    pub fn goals_of(&self, username: &str) -> u32 {
        self.blue
            .iter()
            .chain(self.red.iter())
            .find(|p| p.username == username)
            .map(|p| p.goals)
            .unwrap_or(0)
    }

    /// Enter `Playing` with a fresh scoreboard
    pub fn begin_match(&mut self) {
        self.status = RoomStatus::Playing;
        self.score = Score::default();
        self.winner = Winner::Draw;
        for player in self.blue.iter_mut().chain(self.red.iter_mut()) {
            player.goals = 0;
        }
    }

    pub fn finish(&mut self, winner: Winner) {
        self.status = RoomStatus::FinishedGame;
        self.winner = winner;
    }

    /// Back to `WaitingPlayers`; rosters stay so the owner can call a rematch
    pub fn recycle(&mut self) {
        self.status = RoomStatus::WaitingPlayers;
    }

    pub fn summary(&self) -> RoomSummary {
        let team = |players: &[Player]| TeamSummary {
            players: players.iter().map(Player::summary).collect(),
        };
        RoomSummary {
            id: self.config.id.clone(),
            name: self.config.name.clone(),
            number_of_players: self.config.number_of_players,
            type_of_game: self.config.type_of_game,
            goals_to_win: self.config.goals_to_win,
            owner: self.config.owner.clone(),
            teams: TeamsSummary {
                blue: team(&self.blue),
                red: team(&self.red),
            },
            status: self.status,
            score: self.score,
            winner: self.winner,
        }
    }
}
