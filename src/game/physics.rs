//! Rigid-body capability used by the match world.
//!
//! The match code only talks to the [`Physics`] trait: create bodies, move them,
//! push them, step the world and ask whether two bodies touch. [`SimplePhysics`]
//! is the backend the server ships with: circles and axis-aligned rectangles,
//! static walls, dynamic bodies with air friction and restitution, and sensors
//! that report contact without pushing anything.

use serde::{Deserialize, Serialize};

/// 2D vector in field units (x to the right, y down)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn dot(self, other: Vec2) -> f32 {
        self.x * other.x + self.y * other.y
    }

    pub fn scale(self, k: f32) -> Vec2 {
        Vec2::new(self.x * k, self.y * k)
    }

    pub fn add(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x + other.x, self.y + other.y)
    }

    pub fn sub(self, other: Vec2) -> Vec2 {
        Vec2::new(self.x - other.x, self.y - other.y)
    }

    /// Unit vector in the same direction, `None` for (near) zero length
    pub fn normalized(self) -> Option<Vec2> {
        let len = self.length();
        if len > 1e-6 && len.is_finite() {
            Some(self.scale(1.0 / len))
        } else {
            None
        }
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Handle to a body inside one physics world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle { radius: f32 },
    /// Axis-aligned rectangle given by its half extents
    Rect { half_width: f32, half_height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Immovable and solid
    Static,
    /// Moves and collides
    Dynamic,
    /// Immovable, reports contacts, never collides
    Sensor,
}

/// Everything needed to create a body
#[derive(Debug, Clone, Copy)]
pub struct BodyDesc {
    pub shape: Shape,
    pub position: Vec2,
    pub kind: BodyKind,
    pub mass: f32,
    /// Fraction of velocity lost per step
    pub air_friction: f32,
    pub restitution: f32,
}

impl BodyDesc {
    pub fn dynamic_circle(position: Vec2, radius: f32, mass: f32) -> Self {
        Self {
            shape: Shape::Circle { radius },
            position,
            kind: BodyKind::Dynamic,
            mass,
            air_friction: 0.0,
            restitution: 0.0,
        }
    }

    pub fn static_rect(center: Vec2, width: f32, height: f32) -> Self {
        Self {
            shape: Shape::Rect {
                half_width: width / 2.0,
                half_height: height / 2.0,
            },
            position: center,
            kind: BodyKind::Static,
            mass: 0.0,
            air_friction: 0.0,
            restitution: 0.0,
        }
    }

    pub fn sensor(shape: Shape, position: Vec2) -> Self {
        Self {
            shape,
            position,
            kind: BodyKind::Sensor,
            mass: 0.0,
            air_friction: 0.0,
            restitution: 0.0,
        }
    }

    pub fn with_air_friction(mut self, air_friction: f32) -> Self {
        self.air_friction = air_friction.clamp(0.0, 1.0);
        self
    }

    pub fn with_restitution(mut self, restitution: f32) -> Self {
        self.restitution = restitution.max(0.0);
        self
    }
}

/// Narrow physics interface the match world depends on
pub trait Physics: Send {
    fn add_body(&mut self, desc: BodyDesc) -> BodyId;
    fn position(&self, id: BodyId) -> Vec2;
    fn velocity(&self, id: BodyId) -> Vec2;
    fn set_position(&mut self, id: BodyId, position: Vec2);
    fn set_velocity(&mut self, id: BodyId, velocity: Vec2);
    /// Instant change of momentum; static bodies and sensors ignore it
    fn apply_impulse(&mut self, id: BodyId, impulse: Vec2);
    /// Whether two bodies currently overlap or touch
    fn in_contact(&self, a: BodyId, b: BodyId) -> bool;
    /// Advance the simulation by `dt` seconds
    fn step(&mut self, dt: f32);
}

/// Bodies closer than this count as touching
const CONTACT_SLOP: f32 = 0.5;

#[derive(Debug, Clone, Copy)]
struct Body {
    desc: BodyDesc,
    position: Vec2,
    velocity: Vec2,
}

impl Body {
    fn inv_mass(&self) -> f32 {
        if self.desc.kind == BodyKind::Dynamic && self.desc.mass > 0.0 {
            1.0 / self.desc.mass
        } else {
            0.0
        }
    }

    fn is_solid(&self) -> bool {
        self.desc.kind != BodyKind::Sensor
    }
}

/// Built-in backend: explicit Euler integration plus positional correction
#[derive(Debug, Default)]
pub struct SimplePhysics {
    bodies: Vec<Body>,
}

impl SimplePhysics {
    pub fn new() -> Self {
        Self::default()
    }

    fn body(&self, id: BodyId) -> Option<&Body> {
        self.bodies.get(id.0)
    }

    fn resolve_pair(&mut self, i: usize, j: usize) {
        let a = self.bodies[i];
        let b = self.bodies[j];
        if !a.is_solid() || !b.is_solid() {
            return;
        }
        let inv_a = a.inv_mass();
        let inv_b = b.inv_mass();
        let inv_sum = inv_a + inv_b;
        if inv_sum <= 0.0 {
            return;
        }

        // Normal points from a to b
        let Some((normal, depth)) = penetration(&a, &b) else {
            return;
        };

        let correction = normal.scale(depth / inv_sum);
        self.bodies[i].position = a.position.sub(correction.scale(inv_a));
        self.bodies[j].position = b.position.add(correction.scale(inv_b));

        let relative = b.velocity.sub(a.velocity);
        let approaching = relative.dot(normal);
        if approaching >= 0.0 {
            return;
        }
        let restitution = a.desc.restitution.max(b.desc.restitution);
        let magnitude = -(1.0 + restitution) * approaching / inv_sum;
        let impulse = normal.scale(magnitude);
        self.bodies[i].velocity = a.velocity.sub(impulse.scale(inv_a));
        self.bodies[j].velocity = b.velocity.add(impulse.scale(inv_b));
    }
}

impl Physics for SimplePhysics {
    fn add_body(&mut self, desc: BodyDesc) -> BodyId {
        self.bodies.push(Body {
            desc,
            position: desc.position,
            velocity: Vec2::ZERO,
        });
        BodyId(self.bodies.len() - 1)
    }

    fn position(&self, id: BodyId) -> Vec2 {
        self.body(id).map(|b| b.position).unwrap_or_default()
    }

    fn velocity(&self, id: BodyId) -> Vec2 {
        self.body(id).map(|b| b.velocity).unwrap_or_default()
    }

    fn set_position(&mut self, id: BodyId, position: Vec2) {
        if let Some(body) = self.bodies.get_mut(id.0) {
            body.position = position;
        }
    }

    fn set_velocity(&mut self, id: BodyId, velocity: Vec2) {
        if let Some(body) = self.bodies.get_mut(id.0) {
            if body.desc.kind == BodyKind::Dynamic {
                body.velocity = velocity;
            }
        }
    }

    fn apply_impulse(&mut self, id: BodyId, impulse: Vec2) {
        if let Some(body) = self.bodies.get_mut(id.0) {
            let inv_mass = body.inv_mass();
            body.velocity = body.velocity.add(impulse.scale(inv_mass));
        }
    }

    fn in_contact(&self, a: BodyId, b: BodyId) -> bool {
        match (self.body(a), self.body(b)) {
            (Some(a), Some(b)) => separation(a, b) <= CONTACT_SLOP,
            _ => false,
        }
    }

    fn step(&mut self, dt: f32) {
        for body in self.bodies.iter_mut() {
            if body.desc.kind != BodyKind::Dynamic {
                continue;
            }
            body.position = body.position.add(body.velocity.scale(dt));
            body.velocity = body.velocity.scale(1.0 - body.desc.air_friction);
        }

        let count = self.bodies.len();
        for i in 0..count {
            for j in (i + 1)..count {
                if self.bodies[i].desc.kind == BodyKind::Dynamic
                    || self.bodies[j].desc.kind == BodyKind::Dynamic
                {
                    self.resolve_pair(i, j);
                }
            }
        }
    }
}

/// Distance between the surfaces of two bodies (negative when overlapping)
fn separation(a: &Body, b: &Body) -> f32 {
    match (a.desc.shape, b.desc.shape) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            b.position.sub(a.position).length() - ra - rb
        }
        (Shape::Circle { radius }, Shape::Rect { half_width, half_height }) => {
            circle_rect_distance(a.position, b.position, half_width, half_height) - radius
        }
        (Shape::Rect { half_width, half_height }, Shape::Circle { radius }) => {
            circle_rect_distance(b.position, a.position, half_width, half_height) - radius
        }
        (
            Shape::Rect { half_width: aw, half_height: ah },
            Shape::Rect { half_width: bw, half_height: bh },
        ) => {
            let gap_x = (b.position.x - a.position.x).abs() - aw - bw;
            let gap_y = (b.position.y - a.position.y).abs() - ah - bh;
            gap_x.max(gap_y)
        }
    }
}

/// Distance from a point to the closest point of a rectangle (0 inside)
fn circle_rect_distance(point: Vec2, center: Vec2, half_width: f32, half_height: f32) -> f32 {
    let dx = ((point.x - center.x).abs() - half_width).max(0.0);
    let dy = ((point.y - center.y).abs() - half_height).max(0.0);
    (dx * dx + dy * dy).sqrt()
}

/// Collision normal (from a to b) and depth, or `None` if not overlapping
fn penetration(a: &Body, b: &Body) -> Option<(Vec2, f32)> {
    match (a.desc.shape, b.desc.shape) {
        (Shape::Circle { radius: ra }, Shape::Circle { radius: rb }) => {
            let delta = b.position.sub(a.position);
            let dist = delta.length();
            let depth = ra + rb - dist;
            if depth <= 0.0 {
                return None;
            }
            // Coincident centres: push apart along x
            let normal = delta.normalized().unwrap_or(Vec2::new(1.0, 0.0));
            Some((normal, depth))
        }
        (Shape::Circle { radius }, Shape::Rect { half_width, half_height }) => {
            circle_rect_penetration(a.position, radius, b.position, half_width, half_height)
                .map(|(n, d)| (n.scale(-1.0), d))
        }
        (Shape::Rect { half_width, half_height }, Shape::Circle { radius }) => {
            circle_rect_penetration(b.position, radius, a.position, half_width, half_height)
        }
        // Rectangles in this game are all static
        (Shape::Rect { .. }, Shape::Rect { .. }) => None,
    }
}

/// Normal pointing from the rectangle towards the circle, and overlap depth
fn circle_rect_penetration(
    circle: Vec2,
    radius: f32,
    rect: Vec2,
    half_width: f32,
    half_height: f32,
) -> Option<(Vec2, f32)> {
    let local = circle.sub(rect);
    let inside = local.x.abs() <= half_width && local.y.abs() <= half_height;

    if inside {
        // Leave through the nearest face
        let push_x = half_width - local.x.abs();
        let push_y = half_height - local.y.abs();
        return if push_x < push_y {
            Some((Vec2::new(local.x.signum(), 0.0), push_x + radius))
        } else {
            Some((Vec2::new(0.0, local.y.signum()), push_y + radius))
        };
    }

    let closest = Vec2::new(
        local.x.clamp(-half_width, half_width),
        local.y.clamp(-half_height, half_height),
    );
    let delta = local.sub(closest);
    let dist = delta.length();
    if dist >= radius {
        return None;
    }
    let normal = delta.normalized()?;
    Some((normal, radius - dist))
}
