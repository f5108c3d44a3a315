//! Software-in-the-loop vehicle.
//!
//! A point-mass model of the airframe in NED. Attitude setpoints are tracked
//! ideally, so only the translational dynamics are integrated. The vehicle
//! speaks the same types as a real flight-control unit: it accepts
//! [`Command`]s and reports [`NedTelemetry`].

use std::time::Duration;

use log::{debug, info};
use nalgebra::{UnitQuaternion, Vector3};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::command::Command;
use crate::config::Config;
use crate::driver::Shutdown;
use crate::state::NedTelemetry;
use crate::throttle::ThrottleModel;
use crate::transport::SamplePublisher;

/// Rate at which the simulated autopilot closes a velocity setpoint (1/s).
const VELOCITY_TRACKING_GAIN: f64 = 2.0;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SimError {
    #[error("integration failed between t = {from} s and t = {to} s")]
    Integration { from: f64, to: f64 },
    #[error("simulated state became non-finite at t = {0} s")]
    NonFinite(f64),
}

/// Translational state of the vehicle in NED.
///
/// # Fields
///
/// * `position` - North, east, down (m)
/// * `velocity` - North, east, down (m/s)
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SimState {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
}

impl SimState {
    /// Packs the state as [north, east, down, v_north, v_east, v_down].
    pub fn to_array(&self) -> [f64; 6] {
        [
            self.position.x,
            self.position.y,
            self.position.z,
            self.velocity.x,
            self.velocity.y,
            self.velocity.z,
        ]
    }

    pub fn from_array(arr: &[f64; 6]) -> Self {
        Self {
            position: Vector3::new(arr[0], arr[1], arr[2]),
            velocity: Vector3::new(arr[3], arr[4], arr[5]),
        }
    }

    /// Height above the ground plane (m).
    pub fn height(&self) -> f64 {
        -self.position.z
    }
}

/// How the current setpoint drives the vehicle.
#[derive(Clone, Copy, Debug, PartialEq)]
enum Actuation {
    /// Non-gravitational specific force in NED (m/s²)
    SpecificForce(Vector3<f64>),
    /// Velocity setpoint tracked by the autopilot (m/s)
    Velocity(Vector3<f64>),
    /// Kinematic acceleration setpoint (m/s²)
    Acceleration(Vector3<f64>),
}

/// Translational equations of motion for one integration interval.
struct TranslationalOde {
    actuation: Actuation,
    gravity: f64,
}

impl fast_ode::DifferentialEquation<6> for TranslationalOde {
    /// ṗ = v, v̇ = f + g for a thrust setpoint, a first-order lag towards a
    /// velocity setpoint, or the commanded acceleration itself.
    fn ode_dot_y(&self, _t: f64, y: &fast_ode::Coord<6>) -> (fast_ode::Coord<6>, bool) {
        let state = SimState::from_array(&y.0);

        let acceleration = match self.actuation {
            Actuation::SpecificForce(f) => f + Vector3::new(0.0, 0.0, self.gravity),
            Actuation::Velocity(target) => (target - state.velocity) * VELOCITY_TRACKING_GAIN,
            Actuation::Acceleration(a) => a,
        };

        let dot = SimState {
            position: state.velocity,
            velocity: acceleration,
        };
        (fast_ode::Coord(dot.to_array()), true)
    }
}

/// Simulated quadrotor with an ideal attitude loop.
#[derive(Debug, Clone)]
pub struct SimVehicle {
    state: SimState,
    /// Body to NED
    attitude: UnitQuaternion<f64>,
    /// Roll, pitch, yaw (rad)
    euler: Vector3<f64>,
    actuation: Actuation,
    throttle: f64,
    mass: f64,
    gravity: f64,
    rotor_radius: f64,
    throttle_model: ThrottleModel,
    ground_effect: bool,
    tolerance: f64,
    time: f64,
}

impl SimVehicle {
    /// A vehicle resting on the ground at the origin, motors idle.
    pub fn new(config: &Config) -> Self {
        Self {
            state: SimState::default(),
            attitude: UnitQuaternion::identity(),
            euler: Vector3::zeros(),
            actuation: Actuation::SpecificForce(Vector3::zeros()),
            throttle: 0.0,
            mass: config.vehicle.mass,
            gravity: config.vehicle.gravity,
            rotor_radius: config.vehicle.rotor_radius,
            throttle_model: ThrottleModel::from_params(&config.throttle),
            ground_effect: false,
            tolerance: 1e-6,
            time: 0.0,
        }
    }

    /// Adds Cheeseman ground effect to the rotor thrust.
    pub fn with_ground_effect(mut self, enabled: bool) -> Self {
        self.ground_effect = enabled;
        self
    }

    pub fn with_state(mut self, state: SimState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &SimState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn throttle(&self) -> f64 {
        self.throttle
    }

    /// Latches a new setpoint.
    pub fn apply(&mut self, command: &Command) {
        match command {
            Command::Attitude(c) => {
                self.euler = Vector3::new(c.roll_deg, c.pitch_deg, c.yaw_deg).map(f64::to_radians);
                self.attitude = UnitQuaternion::from_euler_angles(self.euler.x, self.euler.y, self.euler.z);
                self.throttle = c.throttle.clamp(0.0, 1.0);
                let thrust = self.throttle_model.throttle_to_thrust(self.throttle);
                let force = self.attitude * Vector3::new(0.0, 0.0, -thrust / self.mass);
                self.actuation = Actuation::SpecificForce(force);
            }
            Command::Velocity(c) => {
                self.euler.z = c.yaw_deg.to_radians();
                self.attitude = UnitQuaternion::from_euler_angles(0.0, 0.0, self.euler.z);
                self.actuation =
                    Actuation::Velocity(Vector3::new(c.north_m_s, c.east_m_s, c.down_m_s));
            }
            Command::Acceleration(c) => {
                self.actuation =
                    Actuation::Acceleration(Vector3::new(c.north_m_s2, c.east_m_s2, c.down_m_s2));
            }
        }
    }

    /// Thrust ratio in ground effect, with height floored at half a rotor
    /// radius.
    fn ground_effect_ratio(&self) -> f64 {
        if !self.ground_effect {
            return 1.0;
        }
        let height = self.state.height().max(0.5 * self.rotor_radius);
        1.0 / (1.0 - (self.rotor_radius / (4.0 * height)).powi(2))
    }

    /// Integrates the vehicle over `dt` seconds under the current setpoint.
    pub fn advance(&mut self, dt: f64) -> Result<(), SimError> {
        let actuation = match self.actuation {
            Actuation::SpecificForce(f) => Actuation::SpecificForce(f * self.ground_effect_ratio()),
            other => other,
        };
        let ode = TranslationalOde {
            actuation,
            gravity: self.gravity,
        };

        let from = self.time;
        let to = self.time + dt;
        let result = fast_ode::solve_ivp(
            &ode,
            (from, to),
            fast_ode::Coord(self.state.to_array()),
            |_, _| true,
            self.tolerance,
            self.tolerance * 10.0,
        );

        let mut state = match result {
            fast_ode::IvpResult::FinalTimeReached(final_coord) => SimState::from_array(&final_coord.0),
            _ => return Err(SimError::Integration { from, to }),
        };
        if !state.to_array().iter().all(|v| v.is_finite()) {
            return Err(SimError::NonFinite(to));
        }

        // Ground contact
        if state.position.z > 0.0 {
            state.position.z = 0.0;
            state.velocity.z = state.velocity.z.min(0.0);
        }

        self.state = state;
        self.time = to;
        Ok(())
    }

    /// Reported actuator outputs: the collective throttle on every motor.
    fn actuator_controls(&self) -> [f64; 4] {
        let throttle = match self.actuation {
            Actuation::SpecificForce(_) => self.throttle,
            Actuation::Velocity(target) => {
                let acc = (target - self.state.velocity) * VELOCITY_TRACKING_GAIN;
                self.required_throttle(&acc)
            }
            Actuation::Acceleration(acc) => self.required_throttle(&acc),
        };
        [throttle; 4]
    }

    fn required_throttle(&self, acc: &Vector3<f64>) -> f64 {
        let force = acc - Vector3::new(0.0, 0.0, self.gravity);
        self.throttle_model.thrust_to_throttle(force.norm() * self.mass)
    }

    pub fn telemetry(&self) -> NedTelemetry {
        NedTelemetry {
            position_ned: self.state.position,
            velocity_ned: self.state.velocity,
            attitude: self.attitude.into_inner(),
            euler_deg: self.euler.map(f64::to_degrees),
            angular_velocity_body: Vector3::zeros(),
            actuator_controls: Some(self.actuator_controls()),
        }
    }
}

/// Runs `vehicle` in real time until `shutdown` is requested.
///
/// Every `period` the newest received command is latched, the vehicle is
/// advanced and its telemetry published. Returns the vehicle in its final
/// state.
pub async fn run_vehicle(
    mut vehicle: SimVehicle,
    publisher: SamplePublisher,
    mut commands: mpsc::Receiver<Command>,
    period: Duration,
    mut shutdown: Shutdown,
) -> Result<SimVehicle, SimError> {
    info!("simulated vehicle started, {} ms step", period.as_millis());
    publisher.publish(vehicle.telemetry());

    while !shutdown.is_requested() {
        while let Ok(command) = commands.try_recv() {
            vehicle.apply(&command);
        }

        vehicle.advance(period.as_secs_f64())?;
        publisher.publish(vehicle.telemetry());
        debug!(
            "sim t = {:.2}: height {:.3} m, throttle {:.3}",
            vehicle.time(),
            vehicle.state().height(),
            vehicle.throttle()
        );

        tokio::select! {
            _ = shutdown.requested() => break,
            _ = tokio::time::sleep(period) => {}
        }
    }

    info!("simulated vehicle stopped at t = {:.2} s", vehicle.time());
    Ok(vehicle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{AccelerationNedCommand, AttitudeThrustCommand, VelocityNedCommand};
    use crate::state::StateSample;
    use approx::assert_relative_eq;

    fn attitude_command(roll_deg: f64, pitch_deg: f64, throttle: f64) -> Command {
        Command::Attitude(AttitudeThrustCommand {
            roll_deg,
            pitch_deg,
            yaw_deg: 0.0,
            throttle,
        })
    }

    #[test]
    fn test_idle_vehicle_stays_on_ground() {
        let mut vehicle = SimVehicle::new(&Config::default());
        for _ in 0..50 {
            vehicle.advance(0.02).unwrap();
        }
        assert_eq!(vehicle.state().position, Vector3::zeros());
        assert_eq!(vehicle.state().velocity, Vector3::zeros());
        assert_relative_eq!(vehicle.time(), 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_free_fall_matches_gravity() {
        let start = SimState {
            position: Vector3::new(0.0, 0.0, -100.0),
            velocity: Vector3::zeros(),
        };
        let mut vehicle = SimVehicle::new(&Config::default()).with_state(start);
        vehicle.advance(1.0).unwrap();
        assert_relative_eq!(vehicle.state().velocity.z, 9.81, epsilon = 1e-4);
        assert_relative_eq!(vehicle.state().position.z, -100.0 + 0.5 * 9.81, epsilon = 1e-4);
    }

    #[test]
    fn test_full_throttle_climbs() {
        let config = Config::default();
        let mut vehicle = SimVehicle::new(&config);
        vehicle.apply(&attitude_command(0.0, 0.0, 1.0));
        vehicle.advance(1.0).unwrap();

        let thrust = ThrottleModel::from_params(&config.throttle).throttle_to_thrust(1.0);
        let expected = thrust / config.vehicle.mass - 9.81;
        assert!(vehicle.state().height() > 0.0);
        assert_relative_eq!(-vehicle.state().velocity.z, expected, epsilon = 1e-3);
    }

    #[test]
    fn test_tilt_direction() {
        let start = SimState {
            position: Vector3::new(0.0, 0.0, -10.0),
            velocity: Vector3::zeros(),
        };
        let mut vehicle = SimVehicle::new(&Config::default()).with_state(start);
        // Nose down in FRD accelerates north
        vehicle.apply(&attitude_command(0.0, -10.0, 0.6));
        vehicle.advance(0.5).unwrap();
        assert!(vehicle.state().velocity.x > 0.0);
        assert_relative_eq!(vehicle.state().velocity.y, 0.0, epsilon = 1e-9);

        let mut vehicle = SimVehicle::new(&Config::default()).with_state(start);
        // Right wing down accelerates east
        vehicle.apply(&attitude_command(10.0, 0.0, 0.6));
        vehicle.advance(0.5).unwrap();
        assert!(vehicle.state().velocity.y > 0.0);
    }

    #[test]
    fn test_ground_effect_adds_lift_near_ground() {
        let config = Config::default();
        let command = attitude_command(0.0, 0.0, 0.5);

        let mut plain = SimVehicle::new(&config);
        plain.apply(&command);
        plain.advance(0.2).unwrap();

        let mut boosted = SimVehicle::new(&config).with_ground_effect(true);
        boosted.apply(&command);
        boosted.advance(0.2).unwrap();

        assert!(boosted.state().height() > plain.state().height());
    }

    #[test]
    fn test_velocity_and_acceleration_setpoints() {
        let start = SimState {
            position: Vector3::new(0.0, 0.0, -5.0),
            velocity: Vector3::zeros(),
        };
        let mut vehicle = SimVehicle::new(&Config::default()).with_state(start);
        vehicle.apply(&Command::Velocity(VelocityNedCommand {
            north_m_s: 1.0,
            east_m_s: 0.0,
            down_m_s: 0.0,
            yaw_deg: 0.0,
        }));
        vehicle.advance(5.0).unwrap();
        assert_relative_eq!(vehicle.state().velocity.x, 1.0, epsilon = 1e-3);

        vehicle.apply(&Command::Acceleration(AccelerationNedCommand {
            north_m_s2: 0.0,
            east_m_s2: 0.0,
            down_m_s2: -1.0,
        }));
        vehicle.advance(1.0).unwrap();
        assert!(vehicle.state().velocity.z < 0.0);
    }

    #[test]
    fn test_telemetry_converts_to_world_frame() {
        let start = SimState {
            position: Vector3::new(1.0, 2.0, -3.0),
            velocity: Vector3::new(0.0, 0.0, -0.5),
        };
        let vehicle = SimVehicle::new(&Config::default()).with_state(start);
        let sample = StateSample::from(vehicle.telemetry());
        assert_eq!(sample.position, Vector3::new(1.0, 2.0, 3.0));
        assert_eq!(sample.velocity.z, 0.5);
        assert_eq!(sample.actuator_controls, Some([0.0; 4]));
    }
}
