//! Per-room physics world: field layout, bodies, contact pairs and the movement model

use std::str::FromStr;

use crate::ws::protocol::{GameType, Team};

use super::physics::{BodyDesc, BodyId, Physics, Shape, SimplePhysics, Vec2};
use super::powerup::{BoostMeter, Pad, PadState, PAD_BOOST};

pub const FIELD_WIDTH: f32 = 1280.0;
pub const FIELD_HEIGHT: f32 = 720.0;
pub const FIELD_CENTER: Vec2 = Vec2::new(FIELD_WIDTH / 2.0, FIELD_HEIGHT / 2.0);

pub const PLAYER_RADIUS: f32 = 30.0;
pub const BALL_RADIUS: f32 = 10.0;
const PLAYER_MASS: f32 = 9.0;
const BALL_MASS: f32 = 1.0;
const PLAYER_AIR_FRICTION: f32 = 0.2;
const BALL_AIR_FRICTION: f32 = 0.02;

const GOAL_WIDTH: f32 = 5.0;
const GOAL_HEIGHT: f32 = 300.0;
const WALL_THICKNESS: f32 = 2000.0;

const BLUE_COLUMN_X: f32 = 400.0;
const RED_COLUMN_X: f32 = 880.0;
/// Vertical distance between team mates in the kick-off formation
const PLAYER_PITCH: f32 = 80.0;

/// Movement speeds in field units per second
pub const BASE_SPEED: f32 = 180.0;
pub const BOOST_SPEED: f32 = 300.0;
/// Impulse given to the ball by a shot
pub const SHOT_IMPULSE: f32 = 900.0;

pub const PAD_RADIUS: f32 = 20.0;
pub const PAD_POSITIONS: [Vec2; 4] = [
    Vec2::new(320.0, 180.0),
    Vec2::new(960.0, 180.0),
    Vec2::new(320.0, 540.0),
    Vec2::new(960.0, 540.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

/// A parsed `move` input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveCommand {
    Run { direction: Direction, boost: bool },
    Shoot,
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown move: {0}")]
pub struct UnknownMove(String);

impl FromStr for MoveCommand {
    type Err = UnknownMove;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "shoot" {
            return Ok(Self::Shoot);
        }
        let (boost, rest) = match s.strip_prefix("boost") {
            Some(rest) => (true, rest.to_ascii_lowercase()),
            None => (false, s.to_string()),
        };
        let direction = match rest.as_str() {
            "up" => Direction::Up,
            "down" => Direction::Down,
            "left" => Direction::Left,
            "right" => Direction::Right,
            _ => return Err(UnknownMove(s.to_string())),
        };
        Ok(Self::Run { direction, boost })
    }
}

/// Pair of bodies whose contact the loop queries every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContactPair {
    pub a: BodyId,
    pub b: BodyId,
}

/// Which goal sensor the ball touched
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Goal {
    /// Left edge, defended by blue
    A,
    /// Right edge, defended by red
    B,
}

impl Goal {
    /// Team credited when the ball enters this goal
    pub fn scoring_team(self) -> Team {
        match self {
            Goal::A => Team::Red,
            Goal::B => Team::Blue,
        }
    }
}

/// A player's body and match-local state
#[derive(Debug, Clone)]
pub struct PlayerBody {
    pub username: String,
    pub team: Team,
    pub body: BodyId,
    pub spawn: Vec2,
    pub boost: BoostMeter,
    ball_contact: ContactPair,
    pad_contacts: Vec<ContactPair>,
    /// Pads this player was standing on when pickups were last evaluated
    on_pad: Vec<bool>,
}

/// Result of a pad pickup during a tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PadPickup {
    pub username: String,
    pub pad: usize,
    pub boost_level: u32,
}

pub struct World {
    physics: Box<dyn Physics>,
    game_type: GameType,
    ball: BodyId,
    goal_a: ContactPair,
    goal_b: ContactPair,
    players: Vec<PlayerBody>,
    pads: Vec<Pad>,
}

impl World {
    /// Build a world on the built-in physics backend
    pub fn build(blue: &[String], red: &[String], game_type: GameType) -> Self {
        Self::with_physics(Box::new(SimplePhysics::new()), blue, red, game_type)
    }

    /// Build the kick-off layout on any physics backend
    pub fn with_physics(
        mut physics: Box<dyn Physics>,
        blue: &[String],
        red: &[String],
        game_type: GameType,
    ) -> Self {
        add_boundaries(physics.as_mut());

        let goal_shape = Shape::Rect {
            half_width: GOAL_WIDTH / 2.0,
            half_height: GOAL_HEIGHT / 2.0,
        };
        let goal_a_body = physics.add_body(BodyDesc::sensor(
            goal_shape,
            Vec2::new(GOAL_WIDTH / 2.0, FIELD_HEIGHT / 2.0),
        ));
        let goal_b_body = physics.add_body(BodyDesc::sensor(
            goal_shape,
            Vec2::new(FIELD_WIDTH - GOAL_WIDTH / 2.0, FIELD_HEIGHT / 2.0),
        ));

        let ball = physics.add_body(
            BodyDesc::dynamic_circle(FIELD_CENTER, BALL_RADIUS, BALL_MASS)
                .with_air_friction(BALL_AIR_FRICTION)
                .with_restitution(1.0),
        );

        let pads: Vec<Pad> = if game_type == GameType::WithPowerUps {
            PAD_POSITIONS
                .iter()
                .map(|&position| {
                    let body = physics.add_body(BodyDesc::sensor(
                        Shape::Circle { radius: PAD_RADIUS },
                        position,
                    ));
                    Pad::new(body, position)
                })
                .collect()
        } else {
            Vec::new()
        };

        let mut players = Vec::with_capacity(blue.len() + red.len());
        for (team, roster, column_x) in [
            (Team::Blue, blue, BLUE_COLUMN_X),
            (Team::Red, red, RED_COLUMN_X),
        ] {
            for (index, spawn) in formation(column_x, roster.len()).into_iter().enumerate() {
                let body = physics.add_body(
                    BodyDesc::dynamic_circle(spawn, PLAYER_RADIUS, PLAYER_MASS)
                        .with_air_friction(PLAYER_AIR_FRICTION),
                );
                players.push(PlayerBody {
                    username: roster[index].clone(),
                    team,
                    body,
                    spawn,
                    boost: BoostMeter::default(),
                    ball_contact: ContactPair { a: ball, b: body },
                    pad_contacts: pads
                        .iter()
                        .map(|pad| ContactPair { a: body, b: pad.body })
                        .collect(),
                    on_pad: vec![false; pads.len()],
                });
            }
        }

        Self {
            physics,
            game_type,
            ball,
            goal_a: ContactPair { a: ball, b: goal_a_body },
            goal_b: ContactPair { a: ball, b: goal_b_body },
            players,
            pads,
        }
    }

    pub fn game_type(&self) -> GameType {
        self.game_type
    }

    pub fn players(&self) -> &[PlayerBody] {
        &self.players
    }

    pub fn player(&self, username: &str) -> Option<&PlayerBody> {
        self.players.iter().find(|p| p.username == username)
    }

    pub fn pads(&self) -> impl Iterator<Item = PadState> + '_ {
        self.pads.iter().map(Pad::state)
    }

    #[cfg(test)]
    pub(crate) fn pad_count(&self) -> usize {
        self.pads.len()
    }

    pub fn ball_position(&self) -> Vec2 {
        self.physics.position(self.ball)
    }

    #[cfg(test)]
    pub(crate) fn ball_velocity(&self) -> Vec2 {
        self.physics.velocity(self.ball)
    }

    pub fn position_of(&self, player: &PlayerBody) -> Vec2 {
        self.physics.position(player.body)
    }

    #[cfg(test)]
    pub(crate) fn velocity_of(&self, player: &PlayerBody) -> Vec2 {
        self.physics.velocity(player.body)
    }

    pub fn touching(&self, pair: ContactPair) -> bool {
        self.physics.in_contact(pair.a, pair.b)
    }

    pub fn step(&mut self, dt: f32) {
        self.physics.step(dt);
    }

    /// Goal A is checked first, so a ball touching both only counts once
    pub fn goal_contact(&self) -> Option<Goal> {
        if self.touching(self.goal_a) {
            Some(Goal::A)
        } else if self.touching(self.goal_b) {
            Some(Goal::B)
        } else {
            None
        }
    }

    /// Players currently touching the ball
    pub fn ball_touchers(&self) -> impl Iterator<Item = &PlayerBody> + '_ {
        self.players.iter().filter(|p| self.touching(p.ball_contact))
    }

    /// Ball to the centre and every player back to the kick-off formation, all at rest
    pub fn reset_positions(&mut self) {
        self.physics.set_position(self.ball, FIELD_CENTER);
        self.physics.set_velocity(self.ball, Vec2::ZERO);
        for player in &self.players {
            self.physics.set_position(player.body, player.spawn);
            self.physics.set_velocity(player.body, Vec2::ZERO);
        }
    }

    /// Recover from non-finite simulation state and pull escaped bodies back onto the field.
    /// Returns true when a full reset was needed.
    pub fn repair(&mut self) -> bool {
        let corrupted = std::iter::once(self.ball)
            .chain(self.players.iter().map(|p| p.body))
            .any(|b| !self.physics.position(b).is_finite() || !self.physics.velocity(b).is_finite());
        if corrupted {
            self.reset_positions();
            return true;
        }

        for (body, radius) in std::iter::once((self.ball, BALL_RADIUS))
            .chain(self.players.iter().map(|p| (p.body, PLAYER_RADIUS)))
        {
            let position = self.physics.position(body);
            let clamped = Vec2::new(
                position.x.clamp(radius, FIELD_WIDTH - radius),
                position.y.clamp(radius, FIELD_HEIGHT - radius),
            );
            if clamped != position {
                self.physics.set_position(body, clamped);
            }
        }
        false
    }

    /// Apply a move input to a player's body. Returns false for unknown players
    /// and for shots that miss.
    pub fn apply_move(&mut self, username: &str, command: MoveCommand) -> bool {
        let Some(index) = self.players.iter().position(|p| p.username == username) else {
            return false;
        };

        match command {
            MoveCommand::Shoot => self.shoot(index),
            MoveCommand::Run { direction, boost } => {
                let powered = self.game_type == GameType::WithPowerUps;
                let player = &mut self.players[index];
                let speed = if boost && powered && player.boost.drain() {
                    BOOST_SPEED
                } else {
                    BASE_SPEED
                };

                let current = self.physics.velocity(player.body);
                let velocity = match direction {
                    Direction::Up => Vec2::new(current.x, -speed),
                    Direction::Down => Vec2::new(current.x, speed),
                    Direction::Left => Vec2::new(-speed, current.y),
                    Direction::Right => Vec2::new(speed, current.y),
                };
                self.physics.set_velocity(player.body, velocity);
                true
            }
        }
    }

    /// Kick the ball along the shooter's direction of travel if they are touching it
    fn shoot(&mut self, index: usize) -> bool {
        let player = &self.players[index];
        if !self.touching(player.ball_contact) {
            return false;
        }
        let Some(direction) = self.physics.velocity(player.body).normalized() else {
            return false;
        };
        self.physics.apply_impulse(self.ball, direction.scale(SHOT_IMPULSE));
        true
    }

    /// Advance every pad's cooldown by one tick
    pub fn cool_down_pads(&mut self) {
        for pad in self.pads.iter_mut() {
            pad.tick();
        }
    }

    /// Hand out available pads to players who stepped onto them since the last call.
    /// Standing on a pad claims it at most once.
    pub fn claim_pads(&mut self, cooldown_ticks: u32) -> Vec<PadPickup> {
        let mut pickups = Vec::new();
        for player in self.players.iter_mut() {
            for (index, pair) in player.pad_contacts.iter().enumerate() {
                let touching = self.physics.in_contact(pair.a, pair.b);
                let stepped_on = touching && !player.on_pad[index];
                player.on_pad[index] = touching;
                if !stepped_on {
                    continue;
                }
                if self.pads[index].claim(cooldown_ticks) {
                    player.boost.charge(PAD_BOOST);
                    pickups.push(PadPickup {
                        username: player.username.clone(),
                        pad: index,
                        boost_level: player.boost.level(),
                    });
                }
            }
        }
        pickups
    }

    #[cfg(test)]
    pub(crate) fn physics_mut(&mut self) -> &mut dyn Physics {
        self.physics.as_mut()
    }

    #[cfg(test)]
    pub(crate) fn ball_body(&self) -> BodyId {
        self.ball
    }
}

/// Kick-off column for one team, centred vertically
fn formation(column_x: f32, count: usize) -> Vec<Vec2> {
    let start_y = FIELD_HEIGHT / 2.0 - (count.saturating_sub(1) as f32) * PLAYER_PITCH / 2.0;
    (0..count)
        .map(|i| Vec2::new(column_x, start_y + i as f32 * PLAYER_PITCH))
        .collect()
}

/// Four oversized walls hugging the field from outside
fn add_boundaries(physics: &mut dyn Physics) {
    let half = WALL_THICKNESS / 2.0;
    physics.add_body(BodyDesc::static_rect(
        Vec2::new(-half, FIELD_HEIGHT / 2.0),
        WALL_THICKNESS,
        FIELD_HEIGHT + 2.0 * WALL_THICKNESS,
    ));
    physics.add_body(BodyDesc::static_rect(
        Vec2::new(FIELD_WIDTH + half, FIELD_HEIGHT / 2.0),
        WALL_THICKNESS,
        FIELD_HEIGHT + 2.0 * WALL_THICKNESS,
    ));
    physics.add_body(BodyDesc::static_rect(
        Vec2::new(FIELD_WIDTH / 2.0, -half),
        FIELD_WIDTH,
        WALL_THICKNESS,
    ));
    physics.add_body(BodyDesc::static_rect(
        Vec2::new(FIELD_WIDTH / 2.0, FIELD_HEIGHT + half),
        FIELD_WIDTH,
        WALL_THICKNESS,
    ));
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_moves_with_and_without_boost() {
        assert_eq!(
            "up".parse::<MoveCommand>().unwrap(),
            MoveCommand::Run { direction: Direction::Up, boost: false }
        );
        assert_eq!(
            "boostLeft".parse::<MoveCommand>().unwrap(),
            MoveCommand::Run { direction: Direction::Left, boost: true }
        );
        assert_eq!("shoot".parse::<MoveCommand>().unwrap(), MoveCommand::Shoot);
        assert!("jump".parse::<MoveCommand>().is_err());
    }

    #[test]
    fn kickoff_layout_is_deterministic() {
        let world = World::build(&names(&["a", "b"]), &names(&["c", "d"]), GameType::Classic);

        assert_eq!(world.ball_position(), FIELD_CENTER);
        let spawns: Vec<Vec2> = world.players().iter().map(|p| p.spawn).collect();
        assert_eq!(
            spawns,
            vec![
                Vec2::new(400.0, 320.0),
                Vec2::new(400.0, 400.0),
                Vec2::new(880.0, 320.0),
                Vec2::new(880.0, 400.0),
            ]
        );
        assert_eq!(world.players()[2].team, Team::Red);
        assert_eq!(world.pad_count(), 0);
    }

    #[test]
    fn single_player_team_starts_on_the_centre_line() {
        let world = World::build(&names(&["a"]), &names(&["b"]), GameType::WithPowerUps);
        assert_eq!(world.players()[0].spawn, Vec2::new(400.0, 360.0));
        assert_eq!(world.pad_count(), PAD_POSITIONS.len());
    }

    #[test]
    fn move_sets_velocity_directly_and_keeps_other_axis() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        assert!(world.apply_move("a", "right".parse().unwrap()));
        assert!(world.apply_move("a", "up".parse().unwrap()));

        let player = world.player("a").unwrap().clone();
        assert_eq!(world.velocity_of(&player), Vec2::new(BASE_SPEED, -BASE_SPEED));
        assert!(!world.apply_move("ghost", MoveCommand::Shoot));
    }

    #[test]
    fn boost_needs_power_up_mode_and_a_charged_meter() {
        let mut classic = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        classic.apply_move("a", "boostRight".parse().unwrap());
        let player = classic.player("a").unwrap().clone();
        assert_eq!(classic.velocity_of(&player).x, BASE_SPEED);

        let mut powered = World::build(&names(&["a"]), &names(&["b"]), GameType::WithPowerUps);
        powered.apply_move("a", "boostRight".parse().unwrap());
        let player = powered.player("a").unwrap().clone();
        assert_eq!(powered.velocity_of(&player).x, BASE_SPEED);

        powered.players[0].boost.charge(15);
        powered.apply_move("a", "boostRight".parse().unwrap());
        let player = powered.player("a").unwrap().clone();
        assert_eq!(powered.velocity_of(&player).x, BOOST_SPEED);
        assert_eq!(player.boost.level(), 5);
    }

    #[test]
    fn shot_pushes_ball_along_player_velocity() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        let shooter = world.player("a").unwrap().body;
        world.physics_mut().set_position(shooter, Vec2::new(600.0, 360.0));
        world.physics_mut().set_velocity(shooter, Vec2::new(3.0, 4.0));

        assert!(world.apply_move("a", MoveCommand::Shoot));
        let velocity = world.ball_velocity();
        assert!((velocity.x - 0.6 * SHOT_IMPULSE).abs() < 1e-2);
        assert!((velocity.y - 0.8 * SHOT_IMPULSE).abs() < 1e-2);
    }

    #[test]
    fn stationary_or_distant_player_cannot_shoot() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        assert!(!world.apply_move("a", MoveCommand::Shoot));

        let shooter = world.player("a").unwrap().body;
        world.physics_mut().set_position(shooter, Vec2::new(600.0, 360.0));
        assert!(!world.apply_move("a", MoveCommand::Shoot));
        assert_eq!(world.ball_velocity(), Vec2::ZERO);
    }

    #[test]
    fn ball_rolling_left_reaches_goal_a() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        let ball = world.ball_body();
        world.physics_mut().set_position(ball, Vec2::new(40.0, 360.0));
        world.physics_mut().set_velocity(ball, Vec2::new(-1200.0, 0.0));

        let scored = (0..5).any(|_| {
            world.step(DT);
            world.goal_contact() == Some(Goal::A)
        });
        assert!(scored);
        assert_eq!(Goal::A.scoring_team(), Team::Red);
    }

    #[test]
    fn ball_beside_the_goal_mouth_is_not_a_goal() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        let ball = world.ball_body();
        world.physics_mut().set_position(ball, Vec2::new(FIELD_WIDTH - 10.0, 40.0));
        assert_eq!(world.goal_contact(), None);
    }

    #[test]
    fn reset_returns_everyone_to_kickoff() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        world.apply_move("a", "down".parse().unwrap());
        let ball = world.ball_body();
        world.physics_mut().set_velocity(ball, Vec2::new(50.0, 50.0));
        for _ in 0..10 {
            world.step(DT);
        }
        world.reset_positions();

        assert_eq!(world.ball_position(), FIELD_CENTER);
        assert_eq!(world.ball_velocity(), Vec2::ZERO);
        for player in world.players() {
            assert_eq!(world.position_of(player), player.spawn);
            assert_eq!(world.velocity_of(player), Vec2::ZERO);
        }
    }

    #[test]
    fn repair_resets_non_finite_state() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        let ball = world.ball_body();
        world.physics_mut().set_velocity(ball, Vec2::new(f32::NAN, 0.0));

        assert!(world.repair());
        assert_eq!(world.ball_velocity(), Vec2::ZERO);
        assert_eq!(world.ball_position(), FIELD_CENTER);
        assert!(!world.repair());
    }

    #[test]
    fn repair_pulls_escaped_bodies_back_onto_the_field() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::Classic);
        let ball = world.ball_body();
        world.physics_mut().set_position(ball, Vec2::new(-50.0, 900.0));

        assert!(!world.repair());
        assert_eq!(world.ball_position(), Vec2::new(BALL_RADIUS, FIELD_HEIGHT - BALL_RADIUS));
    }

    #[test]
    fn pad_pickup_charges_boost_and_starts_cooldown() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::WithPowerUps);
        let body = world.player("a").unwrap().body;
        world.physics_mut().set_position(body, PAD_POSITIONS[0]);

        let pickups = world.claim_pads(3);
        assert_eq!(
            pickups,
            vec![PadPickup { username: "a".into(), pad: 0, boost_level: 25 }]
        );
        assert!(world.pads().next().unwrap().taken);
        for _ in 0..3 {
            world.cool_down_pads();
        }
        assert!(!world.pads().next().unwrap().taken);
    }

    #[test]
    fn standing_on_a_pad_claims_it_once() {
        let mut world = World::build(&names(&["a"]), &names(&["b"]), GameType::WithPowerUps);
        let body = world.player("a").unwrap().body;
        let spawn = world.player("a").unwrap().spawn;
        world.physics_mut().set_position(body, PAD_POSITIONS[0]);

        assert_eq!(world.claim_pads(3).len(), 1);
        // Cooldown runs out while the player never leaves the pad
        for _ in 0..10 {
            world.cool_down_pads();
            assert!(world.claim_pads(3).is_empty());
        }
        assert_eq!(world.player("a").unwrap().boost.level(), 25);

        world.physics_mut().set_position(body, spawn);
        world.cool_down_pads();
        assert!(world.claim_pads(3).is_empty());

        world.physics_mut().set_position(body, PAD_POSITIONS[0]);
        assert_eq!(world.claim_pads(3).len(), 1);
        assert_eq!(world.player("a").unwrap().boost.level(), 50);
    }
}
