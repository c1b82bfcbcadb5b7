//! Match state and authoritative tick loop

use std::sync::Weak;

use parking_lot::Mutex;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::MatchSettings;
use crate::rooms::registry::RoomEntry;
use crate::util::time::{duration_to_ticks, tick_delta, tick_interval};
use crate::ws::hub::{publish, Lobby};
use crate::ws::protocol::{GameType, RoomId, RoomStatus, Score, ServerMsg, Team, Winner};

use super::snapshot;
use super::world::{PadPickup, PlayerBody, World};

/// A goal evaluated during one tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoalScored {
    pub team: Team,
    /// Last player to touch the ball, if they play for the scoring team
    pub scorer: Option<String>,
}

/// Everything that happened during one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub goal: Option<GoalScored>,
    pub pickups: Vec<PadPickup>,
    pub finished: Option<Winner>,
    /// Non-finite state was found and positions were reset
    pub repaired: bool,
}

/// Simulation state of one running match (owned by the room entry)
pub struct MatchState {
    pub world: World,
    tick: u64,
    goals_to_win: u32,
    dt: f32,
    goal_reset_ticks: u32,
    pad_cooldown_ticks: u32,
    /// Ticks left in the post-goal freeze window
    resetting_for: u32,
    last_toucher: Option<(String, Team)>,
}

impl MatchState {
    pub fn new(world: World, goals_to_win: u32, settings: &MatchSettings) -> Self {
        let hz = settings.tick_rate_hz;
        Self {
            world,
            tick: 0,
            goals_to_win,
            dt: tick_delta(hz),
            goal_reset_ticks: duration_to_ticks(settings.goal_reset, hz),
            pad_cooldown_ticks: duration_to_ticks(settings.pad_cooldown, hz),
            resetting_for: 0,
            last_toucher: None,
        }
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn is_resetting(&self) -> bool {
        self.resetting_for > 0
    }

    /// Advance the simulation one fixed step and evaluate goals, pads and the win condition
    pub fn step(&mut self, score: &mut Score) -> TickReport {
        let mut report = TickReport::default();
        self.tick += 1;

        self.world.step(self.dt);
        report.repaired = self.world.repair();

        self.track_toucher();

        self.world.cool_down_pads();

        if self.resetting_for > 0 {
            self.resetting_for -= 1;
        } else if let Some(goal) = self.world.goal_contact() {
            let team = goal.scoring_team();
            score.add_goal(team);

            let scorer = self
                .last_toucher
                .take()
                .filter(|(_, toucher_team)| *toucher_team == team)
                .map(|(username, _)| username);

            self.world.reset_positions();
            self.resetting_for = self.goal_reset_ticks;
            report.goal = Some(GoalScored { team, scorer });
        }

        if self.world.game_type() == GameType::WithPowerUps && !self.is_resetting() {
            report.pickups = self.world.claim_pads(self.pad_cooldown_ticks);
        }

        if score.reached(self.goals_to_win) {
            report.finished = Some(Winner::from_score(score));
        }

        report
    }

    /// Keep the last toucher while they are still on the ball, otherwise take the nearest toucher
    fn track_toucher(&mut self) {
        let ball = self.world.ball_position();
        let mut nearest: Option<(f32, &PlayerBody)> = None;
        for toucher in self.world.ball_touchers() {
            if let Some((username, _)) = &self.last_toucher {
                if *username == toucher.username {
                    return;
                }
            }
            let distance = self.world.position_of(toucher).sub(ball).length();
            if nearest.map_or(true, |(best, _)| distance < best) {
                nearest = Some((distance, toucher));
            }
        }
        if let Some((_, toucher)) = nearest {
            self.last_toucher = Some((toucher.username.clone(), toucher.team));
        }
    }
}

/// What the loop does after a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopStep {
    Continue,
    /// Room left `Playing` from the outside
    Stop,
    /// Win condition reached on this tick
    Finished,
}

/// Run one tick for a room and publish its consequences. Caller holds the room lock.
pub(crate) fn advance(entry: &mut RoomEntry, lobby: &Lobby) -> LoopStep {
    let RoomEntry {
        room,
        game,
        channel,
        ..
    } = entry;

    if room.status != RoomStatus::Playing {
        return LoopStep::Stop;
    }
    let Some(game) = game.as_mut() else {
        return LoopStep::Stop;
    };

    let report = game.step(&mut room.score);

    if report.repaired {
        warn!(room_id = %room.id(), tick = game.tick(), "Non-finite physics state, positions reset");
    }

    if let Some(goal) = &report.goal {
        if let Some(scorer) = &goal.scorer {
            room.credit_goal(scorer);
        }
        info!(
            room_id = %room.id(),
            team = ?goal.team,
            scorer = ?goal.scorer,
            blue = room.score.blue,
            red = room.score.red,
            "Goal"
        );
    }

    for pickup in &report.pickups {
        debug!(
            room_id = %room.id(),
            username = %pickup.username,
            pad = pickup.pad,
            boost = pickup.boost_level,
            "Pad claimed"
        );
    }

    if let Some(winner) = report.finished {
        room.finish(winner);
        info!(room_id = %room.id(), ?winner, "Match finished");
        publish(
            channel,
            ServerMsg::GameFinished {
                winner,
                score: room.score,
            },
        );
    }

    publish(channel, snapshot::game_state(room, game));

    if report.finished.is_some() {
        lobby.publish(ServerMsg::RoomUpdated(room.summary()));
        return LoopStep::Finished;
    }
    LoopStep::Continue
}

/// The per-room tick task. Holds only a weak reference so a removed room ends it.
pub struct MatchLoop {
    pub room_id: RoomId,
    pub entry: Weak<Mutex<RoomEntry>>,
    /// Launch generation; a newer launch makes this loop stale
    pub generation: u64,
    pub settings: MatchSettings,
    pub lobby: Lobby,
}

impl MatchLoop {
    /// Run the authoritative tick loop, then the post-match cooldown
    pub async fn run(self) {
        info!(room_id = %self.room_id, generation = self.generation, "Match loop started");

        let mut ticker = interval(tick_interval(self.settings.tick_rate_hz));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;

            let Some(entry) = self.entry.upgrade() else {
                warn!(room_id = %self.room_id, "Room removed, stopping match loop");
                return;
            };

            let step = {
                let mut guard = entry.lock();
                if guard.generation != self.generation {
                    LoopStep::Stop
                } else {
                    advance(&mut guard, &self.lobby)
                }
            };

            match step {
                LoopStep::Continue => continue,
                LoopStep::Stop => {
                    info!(room_id = %self.room_id, "Room no longer playing, stopping match loop");
                    return;
                }
                LoopStep::Finished => break,
            }
        }

        sleep(self.settings.finish_cooldown).await;

        let Some(entry) = self.entry.upgrade() else {
            return;
        };
        let mut guard = entry.lock();
        if guard.generation != self.generation || guard.room.status != RoomStatus::FinishedGame {
            return;
        }

        guard.room.recycle();
        guard.game = None;
        guard.loop_task = None;

        let summary = guard.room.summary();
        publish(&guard.channel, ServerMsg::AwaitingPlayersAgain(summary.clone()));
        self.lobby.publish(ServerMsg::RoomUpdated(summary));
        info!(room_id = %self.room_id, "Room waiting for players again");
    }
}
