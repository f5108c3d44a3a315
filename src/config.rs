//! Static configuration of the control loop.
//!
//! A [`Config`] is loaded once by the entry point (usually from a YAML
//! file), validated, and then handed by reference to every component.
//! Nothing reads parameters behind the caller's back.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::CommandMode;
use crate::compensator::GroundEffectModel;
use crate::reference::Trajectory;

/// Configuration errors. Always fatal, always raised before the loop starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid parameter `{name}`: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            name,
            reason: reason.into(),
        }
    }
}

/// Complete controller configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Control period in milliseconds (20 ms = 50 Hz)
    pub tick_ms: u64,
    /// Which setpoint type is sent to the flight-control unit
    pub command_mode: CommandMode,
    pub gains: Gains,
    pub limits: Limits,
    pub vehicle: VehicleParams,
    pub throttle: ThrottleParams,
    pub compensation: CompensationParams,
    pub trajectory: Trajectory,
    /// Elapsed-time window in which flight records are emitted
    pub record_window: RecordWindow,
    /// Ticks of position hold sent after cancellation before the loop returns
    pub shutdown_hold_ticks: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_ms: 20,
            command_mode: CommandMode::default(),
            gains: Gains::default(),
            limits: Limits::default(),
            vehicle: VehicleParams::default(),
            throttle: ThrottleParams::default(),
            compensation: CompensationParams::default(),
            trajectory: Trajectory::default(),
            record_window: RecordWindow::default(),
            shutdown_hold_ticks: 50,
        }
    }
}

/// Proportional gains of the position stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionGains {
    pub xy: f64,
    pub z: f64,
}

/// One PID gain triple.
///
/// Only `p` is required when deserializing. An omitted `i` or `d` is zero,
/// not the default gain of that axis, so `{ p: 3.0 }` is a pure P stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Pid {
    pub p: f64,
    #[serde(default)]
    pub i: f64,
    #[serde(default)]
    pub d: f64,
}

/// Velocity stage gains, horizontal and vertical axes tuned separately.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VelocityGains {
    pub xy: Pid,
    pub z: Pid,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Gains {
    pub position: PositionGains,
    pub velocity: VelocityGains,
}

impl Default for Gains {
    fn default() -> Self {
        Self {
            position: PositionGains { xy: 1.0, z: 1.5 },
            velocity: VelocityGains {
                xy: Pid {
                    p: 2.0,
                    i: 0.1,
                    d: 0.05,
                },
                z: Pid {
                    p: 4.0,
                    i: 2.0,
                    d: 0.05,
                },
            },
        }
    }
}

/// Symmetric clamp on the velocity integral accumulator, per axis group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IntegralLimit {
    pub xy: f64,
    pub z: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Limits {
    /// Horizontal velocity reference bound (m/s), applied per axis
    pub max_vel_xy: f64,
    /// Ascent rate bound (m/s)
    pub max_vel_z_up: f64,
    /// Descent rate bound (m/s), given as a positive number
    pub max_vel_z_down: f64,
    /// Windup guard; `None` leaves the accumulator unbounded
    pub integral: Option<IntegralLimit>,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_vel_xy: 2.0,
            max_vel_z_up: 1.0,
            max_vel_z_down: 0.5,
            integral: None,
        }
    }
}

/// Physical constants of the airframe and environment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VehicleParams {
    /// Total mass (kg)
    pub mass: f64,
    /// Gravitational acceleration (m/s²)
    pub gravity: f64,
    /// Rotor radius (m)
    pub rotor_radius: f64,
    /// Distance between adjacent rotor hubs (m)
    pub rotor_distance: f64,
    /// Air density (kg/m³)
    pub air_density: f64,
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self {
            mass: 1.5,
            gravity: 9.81,
            rotor_radius: 0.12,
            rotor_distance: 0.25,
            air_density: 1.225,
        }
    }
}

/// Linear thrust to throttle relation of the propulsion system.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThrottleParams {
    pub slope: f64,
    pub offset: f64,
    /// Total thrust of all rotors at full throttle (N)
    pub max_thrust: f64,
}

impl Default for ThrottleParams {
    fn default() -> Self {
        Self {
            slope: 0.02394,
            offset: 0.1644,
            max_thrust: 4.0 * 8.9764,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompensationParams {
    /// Model applied to the collective thrust; `None` disables compensation
    pub model: Option<GroundEffectModel>,
    /// Empirical coefficient of the Sanchez multi-rotor model
    pub sanchez_constant: f64,
    /// Heights below this are clamped before a model is evaluated (m)
    pub min_height: f64,
}

impl Default for CompensationParams {
    fn default() -> Self {
        Self {
            model: None,
            sanchez_constant: 1.0,
            min_height: 0.05,
        }
    }
}

/// Half-open `[start, end)` window on elapsed time, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecordWindow {
    pub start: f64,
    pub end: f64,
}

impl Default for RecordWindow {
    fn default() -> Self {
        Self {
            start: 15.0,
            end: 45.0,
        }
    }
}

impl RecordWindow {
    pub fn contains(&self, t: f64) -> bool {
        t >= self.start && t < self.end
    }
}

impl Config {
    /// Loads and validates a YAML configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_yaml_str(&text)?;
        log::info!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parses and validates a YAML document. Missing fields take their defaults.
    pub fn from_yaml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Control period as a [`Duration`].
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    /// Control period in seconds, the `dt` of the integral and derivative terms.
    pub fn dt(&self) -> f64 {
        self.tick_ms as f64 / 1000.0
    }

    /// Checks every parameter. Any violation rejects the whole configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_ms == 0 {
            return Err(ConfigError::invalid("tick_ms", "must be > 0"));
        }

        let gains = &self.gains;
        non_negative("gains.position.xy", gains.position.xy)?;
        non_negative("gains.position.z", gains.position.z)?;
        non_negative("gains.velocity.xy.p", gains.velocity.xy.p)?;
        non_negative("gains.velocity.xy.i", gains.velocity.xy.i)?;
        non_negative("gains.velocity.xy.d", gains.velocity.xy.d)?;
        non_negative("gains.velocity.z.p", gains.velocity.z.p)?;
        non_negative("gains.velocity.z.i", gains.velocity.z.i)?;
        non_negative("gains.velocity.z.d", gains.velocity.z.d)?;

        positive("limits.max_vel_xy", self.limits.max_vel_xy)?;
        positive("limits.max_vel_z_up", self.limits.max_vel_z_up)?;
        positive("limits.max_vel_z_down", self.limits.max_vel_z_down)?;
        if let Some(limit) = self.limits.integral {
            non_negative("limits.integral.xy", limit.xy)?;
            non_negative("limits.integral.z", limit.z)?;
        }

        positive("vehicle.mass", self.vehicle.mass)?;
        positive("vehicle.gravity", self.vehicle.gravity)?;
        positive("vehicle.rotor_radius", self.vehicle.rotor_radius)?;
        positive("vehicle.rotor_distance", self.vehicle.rotor_distance)?;
        positive("vehicle.air_density", self.vehicle.air_density)?;

        positive("throttle.slope", self.throttle.slope)?;
        finite("throttle.offset", self.throttle.offset)?;
        positive("throttle.max_thrust", self.throttle.max_thrust)?;

        finite("compensation.sanchez_constant", self.compensation.sanchez_constant)?;
        positive("compensation.min_height", self.compensation.min_height)?;

        finite("record_window.start", self.record_window.start)?;
        finite("record_window.end", self.record_window.end)?;
        if self.record_window.start >= self.record_window.end {
            return Err(ConfigError::invalid(
                "record_window",
                format!(
                    "start ({}) must be before end ({})",
                    self.record_window.start, self.record_window.end
                ),
            ));
        }

        self.trajectory.validate()
    }
}

pub(crate) fn finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} is not finite")))
    }
}

pub(crate) fn non_negative(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} must be >= 0")))
    }
}

pub(crate) fn positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    finite(name, value)?;
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("{value} must be > 0")))
    }
}
