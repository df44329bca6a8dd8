//! Local movement for the headless demo client and the filter that decides
//! when a new position is worth sending

use shared::Position;
use std::f32::consts::TAU;

/// Smallest displacement that triggers a new position update
pub const DEFAULT_THRESHOLD: f32 = 0.125;

/// Suppresses updates until the player has moved far enough from the last
/// position that was sent
#[derive(Debug, Clone)]
pub struct MovementFilter {
    threshold: f32,
    last_sent: Option<Position>,
}

impl MovementFilter {
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            last_sent: None,
        }
    }

    /// Returns true and remembers `position` if it should go out. The first
    /// position always does.
    pub fn should_send(&mut self, position: Position) -> bool {
        let moved = match self.last_sent {
            None => true,
            Some(last) => position.distance(&last) > self.threshold,
        };
        if moved {
            self.last_sent = Some(position);
        }
        moved
    }

    pub fn last_sent(&self) -> Option<Position> {
        self.last_sent
    }
}

impl Default for MovementFilter {
    fn default() -> Self {
        Self::new(DEFAULT_THRESHOLD)
    }
}

/// Walks a circle in the XZ plane at constant angular speed
#[derive(Debug, Clone)]
pub struct CircleWalker {
    radius: f32,
    /// Radians per second
    speed: f32,
    angle: f32,
    height: f32,
}

impl CircleWalker {
    pub fn new(radius: f32, speed: f32) -> Self {
        Self {
            radius,
            speed,
            angle: 0.0,
            height: 0.0,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(
            self.radius * self.angle.cos(),
            self.height,
            self.radius * self.angle.sin(),
        )
    }

    /// Moves `dt` seconds along the circle and returns the new position
    pub fn advance(&mut self, dt: f32) -> Position {
        self.angle = (self.angle + self.speed * dt).rem_euclid(TAU);
        self.position()
    }
}
