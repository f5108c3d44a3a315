//! Reference trajectories.
//!
//! A generator is a pure function of the elapsed session time and the
//! current position. Every trajectory shares the same envelope: climb to a
//! takeoff altitude above the origin, run its test segment, then descend
//! in place. Phases are half-open intervals on `t`:
//!
//! | phase   | interval                   |
//! |---------|----------------------------|
//! | takeoff | `t < takeoff_end`          |
//! | test    | `takeoff_end <= t < test_end` |
//! | land    | `t >= test_end`            |

use std::f64::consts::PI;

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::config::{finite, non_negative, positive, ConfigError};
use crate::state::Reference;

/// Produces the setpoint for the current tick.
pub trait ReferenceGenerator {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference;

    /// Phase of the session at `t`, for generators that follow a schedule.
    fn phase(&self, _t: f64) -> Option<Phase> {
        None
    }
}

impl<G: ReferenceGenerator + ?Sized> ReferenceGenerator for Box<G> {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        (**self).generate(t, position)
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        (**self).phase(t)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Takeoff,
    Test,
    Land,
}

/// Phase boundaries in seconds since session start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseSchedule {
    pub takeoff_end: f64,
    pub test_end: f64,
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        Self {
            takeoff_end: 15.0,
            test_end: 45.0,
        }
    }
}

impl PhaseSchedule {
    pub fn phase(&self, t: f64) -> Phase {
        if t < self.takeoff_end {
            Phase::Takeoff
        } else if t < self.test_end {
            Phase::Test
        } else {
            Phase::Land
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        positive("trajectory.schedule.takeoff_end", self.takeoff_end)?;
        positive("trajectory.schedule.test_end", self.test_end)?;
        if self.takeoff_end >= self.test_end {
            return Err(ConfigError::Invalid {
                name: "trajectory.schedule",
                reason: format!(
                    "takeoff_end ({}) must be before test_end ({})",
                    self.takeoff_end, self.test_end
                ),
            });
        }
        Ok(())
    }
}

fn takeoff(altitude: f64) -> Reference {
    Reference::hold(Vector3::new(0.0, 0.0, altitude), 0.0)
}

/// Descend straight down from wherever the vehicle currently is.
fn land(position: &Vector3<f64>) -> Reference {
    Reference::hold(Vector3::new(position.x, position.y, 0.0), 0.0)
}

/// Altitude step: take off to one height, then hold another.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepResponse {
    pub schedule: PhaseSchedule,
    pub takeoff_altitude: f64,
    pub hold_altitude: f64,
}

impl Default for StepResponse {
    fn default() -> Self {
        Self {
            schedule: PhaseSchedule::default(),
            takeoff_altitude: 2.1,
            hold_altitude: 1.1,
        }
    }
}

impl ReferenceGenerator for StepResponse {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        match self.schedule.phase(t) {
            Phase::Takeoff => takeoff(self.takeoff_altitude),
            Phase::Test => Reference::hold(Vector3::new(0.0, 0.0, self.hold_altitude), 0.0),
            Phase::Land => land(position),
        }
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        Some(self.schedule.phase(t))
    }
}

/// Horizontal circle around the origin at constant altitude.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Circle {
    pub schedule: PhaseSchedule,
    pub takeoff_altitude: f64,
    /// Circle altitude (m)
    pub altitude: f64,
    /// Circle radius (m)
    pub radius: f64,
    /// Revolutions per second
    pub frequency: f64,
}

impl Default for Circle {
    fn default() -> Self {
        Self {
            schedule: PhaseSchedule::default(),
            takeoff_altitude: 2.1,
            altitude: 2.0,
            radius: 1.0,
            frequency: 0.1,
        }
    }
}

impl ReferenceGenerator for Circle {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        match self.schedule.phase(t) {
            Phase::Takeoff => takeoff(self.takeoff_altitude),
            Phase::Test => {
                let omega = self.frequency * (2.0 * PI);
                let angle = self.frequency * t * (2.0 * PI);
                let (sin, cos) = angle.sin_cos();
                Reference::hold(
                    Vector3::new(self.radius * cos, self.radius * sin, self.altitude),
                    0.0,
                )
                .with_velocity(Vector3::new(
                    -self.radius * omega * sin,
                    self.radius * omega * cos,
                    0.0,
                ))
            }
            Phase::Land => land(position),
        }
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        Some(self.schedule.phase(t))
    }
}

/// Vertical sinusoid above the origin, used to probe ground effect.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Oscillation {
    pub schedule: PhaseSchedule,
    pub takeoff_altitude: f64,
    pub mean_altitude: f64,
    pub amplitude: f64,
    /// Oscillations per second
    pub frequency: f64,
}

impl Default for Oscillation {
    fn default() -> Self {
        Self {
            schedule: PhaseSchedule::default(),
            takeoff_altitude: 1.2,
            mean_altitude: 0.6,
            amplitude: 0.4,
            frequency: 0.1,
        }
    }
}

impl ReferenceGenerator for Oscillation {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        match self.schedule.phase(t) {
            Phase::Takeoff => takeoff(self.takeoff_altitude),
            Phase::Test => {
                let omega = self.frequency * (2.0 * PI);
                let tau = t - self.schedule.takeoff_end;
                let z = self.mean_altitude + self.amplitude * (omega * tau).sin();
                let vz = self.amplitude * omega * (omega * tau).cos();
                Reference::hold(Vector3::new(0.0, 0.0, z), 0.0)
                    .with_velocity(Vector3::new(0.0, 0.0, vz))
            }
            Phase::Land => land(position),
        }
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        Some(self.schedule.phase(t))
    }
}

/// Back-and-forth passes along x at a fixed height and speed, for
/// collecting forward-flight thrust data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sweep {
    pub schedule: PhaseSchedule,
    pub takeoff_altitude: f64,
    pub x_min: f64,
    pub x_max: f64,
    pub y: f64,
    pub height: f64,
    /// Ground speed along x (m/s)
    pub speed: f64,
}

impl Default for Sweep {
    fn default() -> Self {
        Self {
            schedule: PhaseSchedule::default(),
            takeoff_altitude: 1.0,
            x_min: -2.0,
            x_max: 2.0,
            y: 0.0,
            height: 0.3,
            speed: 0.5,
        }
    }
}

impl ReferenceGenerator for Sweep {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        match self.schedule.phase(t) {
            Phase::Takeoff => takeoff(self.takeoff_altitude),
            Phase::Test => {
                let leg = (self.x_max - self.x_min) / self.speed;
                let tau = t - self.schedule.takeoff_end;
                let pass = (tau / leg).floor();
                let along = tau - pass * leg;
                let (x, vx) = if pass as i64 % 2 == 0 {
                    (self.x_min + self.speed * along, self.speed)
                } else {
                    (self.x_max - self.speed * along, -self.speed)
                };
                Reference::hold(Vector3::new(x, self.y, self.height), 0.0)
                    .with_velocity(Vector3::new(vx, 0.0, 0.0))
            }
            Phase::Land => land(position),
        }
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        Some(self.schedule.phase(t))
    }
}

/// Configurable trajectory, selected by `kind` in the config file.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Trajectory {
    StepResponse(StepResponse),
    Circle(Circle),
    Oscillation(Oscillation),
    Sweep(Sweep),
}

impl Default for Trajectory {
    fn default() -> Self {
        Trajectory::StepResponse(StepResponse::default())
    }
}

impl Trajectory {
    pub fn schedule(&self) -> &PhaseSchedule {
        match self {
            Trajectory::StepResponse(s) => &s.schedule,
            Trajectory::Circle(c) => &c.schedule,
            Trajectory::Oscillation(o) => &o.schedule,
            Trajectory::Sweep(s) => &s.schedule,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.schedule().validate()?;
        match self {
            Trajectory::StepResponse(s) => {
                positive("trajectory.takeoff_altitude", s.takeoff_altitude)?;
                positive("trajectory.hold_altitude", s.hold_altitude)?;
            }
            Trajectory::Circle(c) => {
                positive("trajectory.takeoff_altitude", c.takeoff_altitude)?;
                positive("trajectory.altitude", c.altitude)?;
                positive("trajectory.radius", c.radius)?;
                positive("trajectory.frequency", c.frequency)?;
            }
            Trajectory::Oscillation(o) => {
                positive("trajectory.takeoff_altitude", o.takeoff_altitude)?;
                non_negative("trajectory.amplitude", o.amplitude)?;
                positive("trajectory.frequency", o.frequency)?;
                positive("trajectory.mean_altitude", o.mean_altitude)?;
                if o.mean_altitude - o.amplitude <= 0.0 {
                    return Err(ConfigError::Invalid {
                        name: "trajectory.amplitude",
                        reason: format!(
                            "oscillation reaches the ground (mean {} - amplitude {})",
                            o.mean_altitude, o.amplitude
                        ),
                    });
                }
            }
            Trajectory::Sweep(s) => {
                positive("trajectory.takeoff_altitude", s.takeoff_altitude)?;
                positive("trajectory.height", s.height)?;
                positive("trajectory.speed", s.speed)?;
                finite("trajectory.x_min", s.x_min)?;
                finite("trajectory.x_max", s.x_max)?;
                finite("trajectory.y", s.y)?;
                if s.x_min >= s.x_max {
                    return Err(ConfigError::Invalid {
                        name: "trajectory.x_max",
                        reason: format!("x_min ({}) must be below x_max ({})", s.x_min, s.x_max),
                    });
                }
            }
        }
        Ok(())
    }
}

impl ReferenceGenerator for Trajectory {
    fn generate(&self, t: f64, position: &Vector3<f64>) -> Reference {
        match self {
            Trajectory::StepResponse(s) => s.generate(t, position),
            Trajectory::Circle(c) => c.generate(t, position),
            Trajectory::Oscillation(o) => o.generate(t, position),
            Trajectory::Sweep(s) => s.generate(t, position),
        }
    }

    fn phase(&self, t: f64) -> Option<Phase> {
        Some(self.schedule().phase(t))
    }
}
