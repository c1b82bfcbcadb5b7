//! Snapshot building for network transmission

use std::collections::BTreeMap;

use crate::rooms::room::Room;
use crate::ws::protocol::{GameStateMsg, GameType, PlayerFrame, ServerMsg};

use super::r#match::MatchState;

/// Project a room and its running simulation into a `gameState` event
pub fn game_state(room: &Room, game: &MatchState) -> ServerMsg {
    let world = &game.world;

    let players: BTreeMap<String, PlayerFrame> = world
        .players()
        .iter()
        .map(|p| {
            let frame = PlayerFrame {
                position: world.position_of(p),
                team: p.team,
                boost_level: p.boost.level(),
                goals: room.goals_of(&p.username),
            };
            (p.username.clone(), frame)
        })
        .collect();

    let pads = (world.game_type() == GameType::WithPowerUps).then(|| world.pads().collect());

    ServerMsg::GameState(GameStateMsg {
        tick: game.tick(),
        status: room.status,
        resetting: game.is_resetting(),
        score: room.score,
        winner: room.winner,
        players,
        ball_position: world.ball_position(),
        pads,
    })
}
