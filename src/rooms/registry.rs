//! Room registry - owns every room and launches its match loop

use std::sync::Arc;

use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{MatchSettings, StartPolicy};
use crate::game::{MatchLoop, MatchState, MoveCommand, World};
use crate::ws::hub::{publish, Lobby, ROOM_CAPACITY};
use crate::ws::protocol::{
    ConnectionId, NewRoom, RoomStatus, RoomSummary, ServerMsg, Team,
};

use super::room::{Room, RoomConfig, RoomError};

/// One room plus its live match, event group and loop task.
/// Guarded by the room's mutex; never held across an await.
pub struct RoomEntry {
    pub(crate) room: Room,
    pub(crate) game: Option<MatchState>,
    pub(crate) channel: broadcast::Sender<ServerMsg>,
    pub(crate) loop_task: Option<JoinHandle<()>>,
    /// Bumped on every launch and on removal; a loop with an older value stops
    pub(crate) generation: u64,
}

impl RoomEntry {
    fn new(room: Room) -> Self {
        let (channel, _) = broadcast::channel(ROOM_CAPACITY);
        Self {
            room,
            game: None,
            channel,
            loop_task: None,
            generation: 0,
        }
    }

    pub fn summary(&self) -> RoomSummary {
        self.room.summary()
    }
}

/// Result of a successful `joinTeam`
pub struct JoinOutcome {
    /// Room events, subscribed before the join was announced
    pub events: broadcast::Receiver<ServerMsg>,
    /// The join filled the rosters and kicked off the match
    pub started: bool,
}

/// Result of a successful `joinRoom`
pub struct RoomJoin {
    pub summary: RoomSummary,
    pub events: broadcast::Receiver<ServerMsg>,
    /// A rostered player was rebound to this connection
    pub reconnected: bool,
}

/// Registry of all rooms
pub struct RoomRegistry {
    rooms: DashMap<String, Arc<Mutex<RoomEntry>>>,
    lobby: Lobby,
    settings: MatchSettings,
}

impl RoomRegistry {
    pub fn new(settings: MatchSettings) -> Self {
        Self {
            rooms: DashMap::new(),
            lobby: Lobby::new(),
            settings,
        }
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    fn entry(&self, room_id: &str) -> Result<Arc<Mutex<RoomEntry>>, RoomError> {
        self.rooms
            .get(room_id)
            .map(|e| e.value().clone())
            .ok_or(RoomError::RoomNotFound)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Register a room owned by `owner` and announce it to the lobby
    pub fn create_room(&self, request: NewRoom, owner: &str) -> Result<RoomSummary, RoomError> {
        let config = RoomConfig::from_request(request, owner.to_string())?;

        let summary = match self.rooms.entry(config.id.clone()) {
            Entry::Occupied(_) => return Err(RoomError::RoomAlreadyExists),
            Entry::Vacant(slot) => {
                let entry = RoomEntry::new(Room::new(config));
                let summary = entry.summary();
                slot.insert(Arc::new(Mutex::new(entry)));
                summary
            }
        };

        info!(
            room_id = %summary.id,
            owner = %summary.owner,
            players = summary.number_of_players,
            game = ?summary.type_of_game,
            "Room created"
        );
        self.lobby.publish(ServerMsg::RoomCreated(summary.clone()));
        Ok(summary)
    }

    /// Owner-only removal; stops the loop and any pending cooldown
    pub fn remove_room(&self, room_id: &str, requester: &str) -> Result<(), RoomError> {
        let removed = self
            .rooms
            .remove_if(room_id, |_, entry| entry.lock().room.config.owner == requester);

        let Some((id, entry)) = removed else {
            return Err(if self.rooms.contains_key(room_id) {
                RoomError::Unauthorized
            } else {
                RoomError::RoomNotFound
            });
        };

        let mut entry = entry.lock();
        entry.generation += 1;
        if let Some(task) = entry.loop_task.take() {
            task.abort();
        }
        entry.game = None;

        publish(&entry.channel, ServerMsg::RoomRemoved { id: id.clone() });
        self.lobby.publish(ServerMsg::RoomRemoved { id: id.clone() });
        info!(room_id = %id, "Room removed");
        Ok(())
    }

    /// Owner start. Returns false when the rosters are not full yet.
    pub fn start_game(&self, room_id: &str, requester: &str) -> Result<bool, RoomError> {
        let shared = self.entry(room_id)?;
        let mut entry = shared.lock();

        if entry.room.config.owner != requester {
            return Err(RoomError::Unauthorized);
        }
        if entry.room.status != RoomStatus::WaitingPlayers {
            return Err(RoomError::GameAlreadyStarted);
        }
        if !entry.room.is_full() {
            return Ok(false);
        }

        self.launch(&shared, &mut entry);
        Ok(true)
    }

    /// Build the world, reset the scoreboard and spawn a fresh loop
    fn launch(&self, shared: &Arc<Mutex<RoomEntry>>, entry: &mut RoomEntry) {
        entry.room.begin_match();
        let world = World::build(
            &entry.room.usernames(Team::Blue),
            &entry.room.usernames(Team::Red),
            entry.room.config.type_of_game,
        );
        entry.game = Some(MatchState::new(
            world,
            entry.room.config.goals_to_win,
            &self.settings,
        ));

        entry.generation += 1;
        if let Some(previous) = entry.loop_task.take() {
            previous.abort();
        }

        let summary = entry.summary();
        publish(&entry.channel, ServerMsg::GameStarted(summary.clone()));
        self.lobby.publish(ServerMsg::RoomUpdated(summary));

        let match_loop = MatchLoop {
            room_id: entry.room.id().to_string(),
            entry: Arc::downgrade(shared),
            generation: entry.generation,
            settings: self.settings.clone(),
            lobby: self.lobby.clone(),
        };
        entry.loop_task = Some(tokio::spawn(match_loop.run()));

        info!(
            room_id = %entry.room.id(),
            generation = entry.generation,
            "Match launched"
        );
    }

    // ========================================================================
    // Players
    // ========================================================================

    /// Put a player on a team; filling the rosters starts the match under the auto policy
    pub fn join_team(
        &self,
        room_id: &str,
        team: Team,
        username: &str,
        connection: ConnectionId,
    ) -> Result<JoinOutcome, RoomError> {
        let shared = self.entry(room_id)?;
        let mut entry = shared.lock();

        entry.room.admit(team, username, connection)?;
        info!(room_id = %room_id, username = %username, ?team, "Player joined team");

        let events = entry.channel.subscribe();
        let summary = entry.summary();
        publish(&entry.channel, ServerMsg::JoinedToTeam(summary.clone()));
        self.lobby.publish(ServerMsg::RoomUpdated(summary));

        let started = entry.room.is_full() && self.settings.start_policy == StartPolicy::Auto;
        if started {
            self.launch(&shared, &mut entry);
        }

        Ok(JoinOutcome {
            events,
            started,
        })
    }

    /// Subscribe to a room; a rostered player rejoining goes back online on the new connection
    pub fn join_room(
        &self,
        room_id: &str,
        username: &str,
        connection: ConnectionId,
    ) -> Result<RoomJoin, RoomError> {
        let shared = self.entry(room_id)?;
        let mut entry = shared.lock();

        let events = entry.channel.subscribe();
        let reconnected = entry.room.reconnect(username, connection);
        let summary = entry.summary();

        if reconnected {
            info!(room_id = %room_id, username = %username, "Player reconnected");
            publish(&entry.channel, ServerMsg::RoomUpdated(summary.clone()));
            self.lobby.publish(ServerMsg::RoomUpdated(summary.clone()));
        }

        Ok(RoomJoin {
            summary,
            events,
            reconnected,
        })
    }

    /// Mark every player bound to a closed connection offline.
    /// Returns the number of rooms affected.
    pub fn disconnect(&self, connection: ConnectionId) -> usize {
        let entries: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();

        let mut affected = 0;
        for shared in entries {
            let mut entry = shared.lock();
            if !entry.room.mark_offline(connection) {
                continue;
            }
            affected += 1;
            let summary = entry.summary();
            publish(&entry.channel, ServerMsg::RoomUpdated(summary.clone()));
            self.lobby.publish(ServerMsg::RoomUpdated(summary));
        }

        if affected > 0 {
            info!(connection = %connection, rooms = affected, "Players marked offline");
        }
        affected
    }

    // ========================================================================
    // Match input and chat
    // ========================================================================

    /// Apply a move to a player's body. Ok(false) means the input had no effect
    /// (a shot that missed the ball).
    pub fn apply_move(
        &self,
        room_id: &str,
        username: &str,
        command: MoveCommand,
    ) -> Result<bool, RoomError> {
        let shared = self.entry(room_id)?;
        let mut entry = shared.lock();

        if entry.room.status != RoomStatus::Playing {
            return Err(RoomError::PlayerNotInMatch);
        }
        let Some(game) = entry.game.as_mut() else {
            return Err(RoomError::PlayerNotInMatch);
        };
        if game.world.player(username).is_none() {
            return Err(RoomError::PlayerNotInMatch);
        }
        Ok(game.world.apply_move(username, command))
    }

    /// Relay a chat line to the room with a server-assigned id and timestamp
    pub fn chat(&self, room_id: &str, text: String, author: String) -> Result<(), RoomError> {
        let shared = self.entry(room_id)?;
        let entry = shared.lock();

        publish(
            &entry.channel,
            ServerMsg::NewMessage {
                id: Uuid::new_v4(),
                text,
                author,
                sent_at: Utc::now(),
            },
        );
        Ok(())
    }

    // ========================================================================
    // Listing
    // ========================================================================

    /// Every room, ordered by id
    pub fn summaries(&self) -> Vec<RoomSummary> {
        let mut rooms: Vec<RoomSummary> = self
            .rooms
            .iter()
            .map(|e| e.value().lock().summary())
            .collect();
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        rooms
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn active_matches(&self) -> usize {
        self.rooms
            .iter()
            .filter(|e| e.value().lock().room.status == RoomStatus::Playing)
            .count()
    }

    pub fn total_players(&self) -> usize {
        self.rooms
            .iter()
            .map(|e| e.value().lock().room.roster_size())
            .sum()
    }
}

impl Drop for RoomRegistry {
    fn drop(&mut self) {
        for entry in self.rooms.iter() {
            if let Some(task) = entry.value().lock().loop_task.take() {
                warn!(room_id = %entry.key(), "Aborting match loop on shutdown");
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::game::physics::Vec2;
    use crate::ws::protocol::{GameType, PlayerStatus, Score, Winner};
    use tokio_test::{assert_err, assert_ok};

    fn request(id: &str, players: u8, goals_to_win: u32) -> NewRoom {
        NewRoom {
            id: Some(id.into()),
            name: id.into(),
            number_of_players: players,
            type_of_game: GameType::Classic,
            goals_to_win,
        }
    }

    fn owner_policy() -> MatchSettings {
        MatchSettings {
            start_policy: StartPolicy::Owner,
            ..MatchSettings::default()
        }
    }

    fn drain(events: &mut broadcast::Receiver<ServerMsg>) -> Vec<ServerMsg> {
        let mut out = Vec::new();
        while let Ok(msg) = events.try_recv() {
            out.push(msg);
        }
        out
    }

    fn status(registry: &RoomRegistry, id: &str) -> RoomStatus {
        registry.entry(id).unwrap().lock().room.status
    }

    #[tokio::test]
    async fn duplicate_room_ids_are_rejected() {
        let registry = RoomRegistry::new(MatchSettings::default());
        let mut lobby = registry.lobby().subscribe();

        assert_ok!(registry.create_room(request("r1", 2, 1), "ana"));
        assert_eq!(
            registry.create_room(request("r1", 4, 1), "bo").err(),
            Some(RoomError::RoomAlreadyExists)
        );
        assert_eq!(registry.room_count(), 1);

        let events = drain(&mut lobby);
        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], ServerMsg::RoomCreated(room) if room.owner == "ana"));
    }

    #[tokio::test]
    async fn unknown_room_is_reported() {
        let registry = RoomRegistry::new(MatchSettings::default());
        let conn = Uuid::new_v4();
        assert_eq!(
            registry.join_team("nope", Team::Blue, "a", conn).err(),
            Some(RoomError::RoomNotFound)
        );
        assert_eq!(
            registry.join_room("nope", "a", conn).err(),
            Some(RoomError::RoomNotFound)
        );
        assert_err!(registry.chat("nope", "hi".into(), "a".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn filling_the_roster_starts_the_match_and_streams_state() {
        let registry = RoomRegistry::new(MatchSettings::default());
        registry.create_room(request("r1", 2, 3), "ana").unwrap();

        let first = assert_ok!(registry.join_team("r1", Team::Blue, "ana", Uuid::new_v4()));
        assert!(!first.started);
        let mut events = first.events;

        let second = assert_ok!(registry.join_team("r1", Team::Red, "bo", Uuid::new_v4()));
        assert!(second.started);
        assert_eq!(status(&registry, "r1"), RoomStatus::Playing);
        assert_eq!(registry.active_matches(), 1);
        assert_eq!(registry.total_players(), 2);

        tokio::time::sleep(Duration::from_millis(100)).await;

        let events = drain(&mut events);
        assert!(matches!(events[0], ServerMsg::JoinedToTeam(_)));
        assert!(matches!(events[1], ServerMsg::JoinedToTeam(_)));
        assert!(matches!(events[2], ServerMsg::GameStarted(_)));
        let snapshots = events
            .iter()
            .filter(|e| matches!(e, ServerMsg::GameState(_)))
            .count();
        assert!(snapshots >= 5, "expected a snapshot per tick, got {snapshots}");
    }

    #[tokio::test(start_paused = true)]
    async fn blue_goal_finishes_then_room_waits_again() {
        let registry = RoomRegistry::new(MatchSettings::default());
        registry.create_room(request("r1", 2, 1), "ana").unwrap();
        let mut events = registry
            .join_team("r1", Team::Blue, "ana", Uuid::new_v4())
            .unwrap()
            .events;
        registry
            .join_team("r1", Team::Red, "bo", Uuid::new_v4())
            .unwrap();

        {
            let shared = registry.entry("r1").unwrap();
            let mut entry = shared.lock();
            let world = &mut entry.game.as_mut().unwrap().world;
            let ball = world.ball_body();
            let striker = world.player("ana").unwrap().body;
            world.physics_mut().set_position(ball, Vec2::new(1270.0, 360.0));
            world.physics_mut().set_position(striker, Vec2::new(1230.0, 360.0));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let shared = registry.entry("r1").unwrap();
            let entry = shared.lock();
            assert_eq!(entry.room.status, RoomStatus::FinishedGame);
            assert_eq!(entry.room.score, Score { blue: 1, red: 0 });
            assert_eq!(entry.room.winner, Winner::Blue);
            assert_eq!(entry.room.goals_of("ana"), 1);
        }
        let finished = drain(&mut events);
        assert!(finished.iter().any(|e| matches!(
            e,
            ServerMsg::GameFinished { winner: Winner::Blue, score: Score { blue: 1, red: 0 } }
        )));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(status(&registry, "r1"), RoomStatus::WaitingPlayers);
        let recycled = drain(&mut events);
        assert!(recycled
            .iter()
            .any(|e| matches!(e, ServerMsg::AwaitingPlayersAgain(_))));
        assert!(!recycled.iter().any(|e| matches!(e, ServerMsg::GameState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn owner_policy_waits_for_start_game() {
        let registry = RoomRegistry::new(owner_policy());
        registry.create_room(request("r1", 2, 1), "ana").unwrap();
        registry.join_team("r1", Team::Blue, "ana", Uuid::new_v4()).unwrap();

        assert_eq!(registry.start_game("r1", "ana"), Ok(false));

        let joined = registry.join_team("r1", Team::Red, "bo", Uuid::new_v4()).unwrap();
        assert!(!joined.started);
        assert_eq!(status(&registry, "r1"), RoomStatus::WaitingPlayers);

        assert_eq!(registry.start_game("r1", "bo"), Err(RoomError::Unauthorized));
        assert_eq!(registry.start_game("r1", "ana"), Ok(true));
        assert_eq!(status(&registry, "r1"), RoomStatus::Playing);
        assert_eq!(
            registry.start_game("r1", "ana"),
            Err(RoomError::GameAlreadyStarted)
        );
        assert_eq!(
            registry.join_team("r1", Team::Red, "cy", Uuid::new_v4()).err(),
            Some(RoomError::GameAlreadyStarted)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn rematch_relaunches_with_a_new_generation() {
        let settings = MatchSettings {
            finish_cooldown: Duration::from_millis(100),
            ..MatchSettings::default()
        };
        let registry = RoomRegistry::new(settings);
        registry.create_room(request("r1", 2, 1), "ana").unwrap();
        registry.join_team("r1", Team::Blue, "ana", Uuid::new_v4()).unwrap();
        registry.join_team("r1", Team::Red, "bo", Uuid::new_v4()).unwrap();

        {
            let shared = registry.entry("r1").unwrap();
            let mut entry = shared.lock();
            entry.room.finish(Winner::Draw);
        }
        // Loop sees the room left Playing and stops without recycling
        tokio::time::sleep(Duration::from_millis(50)).await;
        {
            let shared = registry.entry("r1").unwrap();
            let mut entry = shared.lock();
            assert_eq!(entry.room.status, RoomStatus::FinishedGame);
            entry.room.recycle();
        }

        assert_eq!(registry.start_game("r1", "ana"), Ok(true));
        let shared = registry.entry("r1").unwrap();
        let entry = shared.lock();
        assert_eq!(entry.generation, 2);
        assert_eq!(entry.room.score, Score::default());
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_room_stops_its_loop() {
        let registry = RoomRegistry::new(MatchSettings::default());
        registry.create_room(request("r1", 2, 1), "ana").unwrap();
        registry.join_team("r1", Team::Blue, "ana", Uuid::new_v4()).unwrap();
        let mut events = registry
            .join_team("r1", Team::Red, "bo", Uuid::new_v4())
            .unwrap()
            .events;
        let mut lobby = registry.lobby().subscribe();

        assert_eq!(registry.remove_room("r1", "bo"), Err(RoomError::Unauthorized));
        assert_ok!(registry.remove_room("r1", "ana"));
        assert_eq!(registry.remove_room("r1", "ana"), Err(RoomError::RoomNotFound));
        assert_eq!(registry.room_count(), 0);

        assert!(drain(&mut lobby)
            .iter()
            .any(|e| matches!(e, ServerMsg::RoomRemoved { id } if id == "r1")));

        drain(&mut events);
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(!drain(&mut events)
            .iter()
            .any(|e| matches!(e, ServerMsg::GameState(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_and_rejoin_flip_player_status() {
        let registry = RoomRegistry::new(MatchSettings::default());
        registry.create_room(request("r1", 2, 3), "ana").unwrap();
        let ana = Uuid::new_v4();
        registry.join_team("r1", Team::Blue, "ana", ana).unwrap();
        registry.join_team("r1", Team::Red, "bo", Uuid::new_v4()).unwrap();

        assert_eq!(registry.disconnect(ana), 1);
        assert_eq!(registry.disconnect(ana), 0);
        let summary = &registry.summaries()[0];
        assert_eq!(summary.teams.blue.players[0].status, PlayerStatus::Offline);

        let fresh = Uuid::new_v4();
        let rejoined = registry.join_room("r1", "ana", fresh).unwrap();
        assert!(rejoined.reconnected);
        let player = &rejoined.summary.teams.blue.players[0];
        assert_eq!(player.status, PlayerStatus::Online);
        assert_eq!(player.socket_id, fresh);

        let spectator = registry.join_room("r1", "zed", Uuid::new_v4()).unwrap();
        assert!(!spectator.reconnected);
        assert_eq!(registry.total_players(), 2);
    }

    #[tokio::test]
    async fn rejoining_a_waiting_room_rebinds_the_connection() {
        let registry = RoomRegistry::new(owner_policy());
        registry.create_room(request("r1", 4, 3), "ana").unwrap();
        let first = Uuid::new_v4();
        registry.join_team("r1", Team::Blue, "ana", first).unwrap();
        assert_eq!(registry.disconnect(first), 1);

        let second = Uuid::new_v4();
        let rejoined = assert_ok!(registry.join_room("r1", "ana", second));
        assert!(rejoined.reconnected);
        let player = &rejoined.summary.teams.blue.players[0];
        assert_eq!(player.status, PlayerStatus::Online);
        assert_eq!(player.socket_id, second);
        assert_eq!(rejoined.summary.status, RoomStatus::WaitingPlayers);
        assert_eq!(registry.total_players(), 1);

        // Closing the live connection is noticed again
        assert_eq!(registry.disconnect(second), 1);
        let summary = &registry.summaries()[0];
        assert_eq!(summary.teams.blue.players[0].status, PlayerStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn moves_need_a_running_match_and_a_rostered_player() {
        let registry = RoomRegistry::new(owner_policy());
        registry.create_room(request("r1", 2, 3), "ana").unwrap();
        registry.join_team("r1", Team::Blue, "ana", Uuid::new_v4()).unwrap();
        registry.join_team("r1", Team::Red, "bo", Uuid::new_v4()).unwrap();

        let up: MoveCommand = "up".parse().unwrap();
        assert_eq!(
            registry.apply_move("r1", "ana", up),
            Err(RoomError::PlayerNotInMatch)
        );

        registry.start_game("r1", "ana").unwrap();
        assert_eq!(registry.apply_move("r1", "ana", up), Ok(true));
        assert_eq!(
            registry.apply_move("r1", "zed", up),
            Err(RoomError::PlayerNotInMatch)
        );
        assert_eq!(registry.apply_move("r1", "ana", MoveCommand::Shoot), Ok(false));
    }

    #[tokio::test]
    async fn chat_is_stamped_and_relayed() {
        let registry = RoomRegistry::new(MatchSettings::default());
        registry.create_room(request("r1", 2, 1), "ana").unwrap();
        let mut events = registry.join_room("r1", "zed", Uuid::new_v4()).unwrap().events;

        registry.chat("r1", "gg".into(), "ana".into()).unwrap();
        registry.chat("r1", "gg".into(), "ana".into()).unwrap();

        let messages = drain(&mut events);
        let ids: Vec<Uuid> = messages
            .iter()
            .filter_map(|m| match m {
                ServerMsg::NewMessage { id, text, .. } if text == "gg" => Some(*id),
                _ => None,
            })
            .collect();
        assert_eq!(ids.len(), 2);
        assert_ne!(ids[0], ids[1]);
    }
}
