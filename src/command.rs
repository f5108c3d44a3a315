//! Setpoints sent to the flight-control unit.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::attitude::AttitudeTarget;

/// Which kind of setpoint the loop emits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandMode {
    /// Roll, pitch, yaw and throttle
    #[default]
    Attitude,
    /// NED velocity and yaw
    Velocity,
    /// NED acceleration
    Acceleration,
}

/// Attitude and normalized thrust setpoint.
///
/// Angles are in degrees in the command frame, which mirrors the
/// controller's world frame on all three axes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeThrustCommand {
    pub roll_deg: f64,
    pub pitch_deg: f64,
    pub yaw_deg: f64,
    /// Normalized thrust in `[0, 1]`
    pub throttle: f64,
}

impl AttitudeThrustCommand {
    pub fn from_target(target: &AttitudeTarget, throttle: f64) -> Self {
        let mirrored = -target.euler.map(f64::to_degrees);
        Self {
            roll_deg: mirrored.x,
            pitch_deg: mirrored.y,
            yaw_deg: mirrored.z,
            throttle,
        }
    }
}

/// Velocity setpoint in NED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityNedCommand {
    pub north_m_s: f64,
    pub east_m_s: f64,
    pub down_m_s: f64,
    pub yaw_deg: f64,
}

impl VelocityNedCommand {
    /// `vel` in the z-up world frame, `yaw` in radians.
    pub fn from_world(vel: &Vector3<f64>, yaw: f64) -> Self {
        Self {
            north_m_s: vel.x,
            east_m_s: vel.y,
            down_m_s: -vel.z,
            yaw_deg: -yaw.to_degrees(),
        }
    }
}

/// Acceleration setpoint in NED.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AccelerationNedCommand {
    pub north_m_s2: f64,
    pub east_m_s2: f64,
    pub down_m_s2: f64,
}

impl AccelerationNedCommand {
    pub fn from_world(acc: &Vector3<f64>) -> Self {
        Self {
            north_m_s2: acc.x,
            east_m_s2: acc.y,
            down_m_s2: -acc.z,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Attitude(AttitudeThrustCommand),
    Velocity(VelocityNedCommand),
    Acceleration(AccelerationNedCommand),
}

impl Command {
    pub fn mode(&self) -> CommandMode {
        match self {
            Command::Attitude(_) => CommandMode::Attitude,
            Command::Velocity(_) => CommandMode::Velocity,
            Command::Acceleration(_) => CommandMode::Acceleration,
        }
    }

    /// True when no field is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        let values = match self {
            Command::Attitude(c) => [c.roll_deg, c.pitch_deg, c.yaw_deg, c.throttle],
            Command::Velocity(c) => [c.north_m_s, c.east_m_s, c.down_m_s, c.yaw_deg],
            Command::Acceleration(c) => [c.north_m_s2, c.east_m_s2, c.down_m_s2, 0.0],
        };
        values.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Matrix3;

    #[test]
    fn test_attitude_command_is_mirrored() {
        let target = AttitudeTarget {
            body_frame: Matrix3::identity(),
            euler: Vector3::new(0.1, -0.2, std::f64::consts::FRAC_PI_2),
        };
        let command = AttitudeThrustCommand::from_target(&target, 0.5);
        assert_eq!(command.roll_deg, -0.1_f64.to_degrees());
        assert_eq!(command.pitch_deg, 0.2_f64.to_degrees());
        assert_eq!(command.yaw_deg, -90.0);
        assert_eq!(command.throttle, 0.5);
    }

    #[test]
    fn test_ned_commands_flip_vertical() {
        let velocity = VelocityNedCommand::from_world(&Vector3::new(1.0, 2.0, 0.5), 0.0);
        assert_eq!(velocity.north_m_s, 1.0);
        assert_eq!(velocity.east_m_s, 2.0);
        assert_eq!(velocity.down_m_s, -0.5);

        let acceleration = AccelerationNedCommand::from_world(&Vector3::new(0.0, -1.0, 3.0));
        assert_eq!(acceleration.down_m_s2, -3.0);
        assert_eq!(Command::Acceleration(acceleration).mode(), CommandMode::Acceleration);
    }

    #[test]
    fn test_non_finite_command_detected() {
        let command = Command::Velocity(VelocityNedCommand {
            north_m_s: 0.0,
            east_m_s: f64::NAN,
            down_m_s: 0.0,
            yaw_deg: 0.0,
        });
        assert!(!command.is_finite());
    }

    #[test]
    fn test_mode_from_yaml() {
        let mode: CommandMode = serde_yaml::from_str("acceleration").unwrap();
        assert_eq!(mode, CommandMode::Acceleration);
        assert_eq!(CommandMode::default(), CommandMode::Attitude);
    }
}
