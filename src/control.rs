use nalgebra::Vector3;

use crate::config::{Config, IntegralLimit};
use crate::state::{Reference, StateSample};

/// A cascaded position/velocity controller for the quadrotor outer loop.
///
/// The controller converts a position setpoint into a desired acceleration
/// vector in the z-up world frame. Attitude and thrust are derived from that
/// vector downstream (see [`crate::attitude`]), and the attitude itself is
/// tracked by the flight-control unit.
///
/// # Control Architecture
///
/// Position Reference → Position Stage (P, clamped) → Velocity Reference
///                                                         ↓
/// Measured Velocity → Velocity Stage (PID) → Desired Acceleration
///
/// Horizontal (x, y) and vertical (z) axes carry independent gains. Gains
/// are applied element-wise, so each axis is a decoupled scalar loop.
///
/// # Error State
///
/// The velocity stage keeps the previous velocity error for its derivative
/// term and one 3D integral accumulator. Both persist across ticks and are
/// only touched by [`velocity_control`](Self::velocity_control), once per tick.
#[derive(Debug, Clone)]
pub struct CascadedController {
    /// Control loop time step (seconds)
    dt: f64,

    // Controller gains
    /// Proportional gains of the position stage [x, y, z] (1/s)
    kp_pos: Vector3<f64>,
    /// Proportional gains of the velocity stage [x, y, z] (1/s)
    kp_vel: Vector3<f64>,
    /// Integral gains of the velocity stage [x, y, z] (1/s²)
    ki_vel: Vector3<f64>,
    /// Derivative gains of the velocity stage [x, y, z] (dimensionless)
    kd_vel: Vector3<f64>,

    // Limits
    /// Maximum horizontal velocity reference, per axis (m/s)
    max_vel_xy: f64,
    /// Maximum ascent rate (m/s)
    max_vel_z_up: f64,
    /// Maximum descent rate (m/s, positive)
    max_vel_z_down: f64,
    /// Symmetric bound on the integral accumulator, if any (m)
    integral_limit: Option<Vector3<f64>>,

    // Controller state
    /// Velocity error of the current tick
    vel_err: Vector3<f64>,
    /// Velocity error of the previous tick
    vel_err_prev: Vector3<f64>,
    /// Accumulated velocity error for integral control
    integrated_vel_error: Vector3<f64>,
}

impl CascadedController {
    /// Creates a controller with the given time step and all gains at zero.
    ///
    /// Velocity limits default to unbounded; set them with
    /// [`set_velocity_limits`](Self::set_velocity_limits).
    pub fn new(dt: f64) -> Self {
        Self {
            dt,
            kp_pos: Vector3::zeros(),
            kp_vel: Vector3::zeros(),
            ki_vel: Vector3::zeros(),
            kd_vel: Vector3::zeros(),
            max_vel_xy: f64::INFINITY,
            max_vel_z_up: f64::INFINITY,
            max_vel_z_down: f64::INFINITY,
            integral_limit: None,
            vel_err: Vector3::zeros(),
            vel_err_prev: Vector3::zeros(),
            integrated_vel_error: Vector3::zeros(),
        }
    }

    /// Builds a controller from a configuration.
    ///
    /// The configuration is assumed to be validated; see
    /// [`Config::validate`].
    pub fn from_config(config: &Config) -> Self {
        let gains = &config.gains;
        let limits = &config.limits;

        let mut controller = Self::new(config.dt());
        controller.set_gains(
            Vector3::new(gains.position.xy, gains.position.xy, gains.position.z),
            Vector3::new(gains.velocity.xy.p, gains.velocity.xy.p, gains.velocity.z.p),
            Vector3::new(gains.velocity.xy.i, gains.velocity.xy.i, gains.velocity.z.i),
            Vector3::new(gains.velocity.xy.d, gains.velocity.xy.d, gains.velocity.z.d),
        );
        controller.set_velocity_limits(
            limits.max_vel_xy,
            limits.max_vel_z_up,
            limits.max_vel_z_down,
        );
        controller.set_integral_limit(limits.integral);
        controller
    }

    /// Sets all controller gains.
    ///
    /// # Arguments
    ///
    /// * `kp_pos` - Position P gains [x, y, z] (m/s per m)
    /// * `kp_vel` - Velocity P gains [x, y, z] (m/s² per m/s)
    /// * `ki_vel` - Velocity I gains [x, y, z] (m/s² per m)
    /// * `kd_vel` - Velocity D gains [x, y, z] (m/s² per m/s²)
    ///
    /// # Tuning Guidelines
    ///
    /// Tune the velocity stage first with the position stage disabled, then
    /// raise the position gains until the step response starts to overshoot.
    pub fn set_gains(
        &mut self,
        kp_pos: Vector3<f64>,
        kp_vel: Vector3<f64>,
        ki_vel: Vector3<f64>,
        kd_vel: Vector3<f64>,
    ) {
        self.kp_pos = kp_pos;
        self.kp_vel = kp_vel;
        self.ki_vel = ki_vel;
        self.kd_vel = kd_vel;
    }

    /// Sets the velocity reference bounds. The descent bound is given as a
    /// positive rate.
    pub fn set_velocity_limits(&mut self, max_vel_xy: f64, max_vel_z_up: f64, max_vel_z_down: f64) {
        self.max_vel_xy = max_vel_xy;
        self.max_vel_z_up = max_vel_z_up;
        self.max_vel_z_down = max_vel_z_down;
    }

    /// Bounds the integral accumulator per axis group, or removes the bound.
    pub fn set_integral_limit(&mut self, limit: Option<IntegralLimit>) {
        self.integral_limit = limit.map(|l| Vector3::new(l.xy, l.xy, l.z));
    }

    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// Accumulated velocity error (m).
    pub fn integrated_error(&self) -> Vector3<f64> {
        self.integrated_vel_error
    }

    /// Clears the persisted error state.
    pub fn reset(&mut self) {
        self.vel_err = Vector3::zeros();
        self.vel_err_prev = Vector3::zeros();
        self.integrated_vel_error = Vector3::zeros();
    }

    /// Calculates the velocity reference from the position error.
    ///
    /// This is the outer loop of the cascade. Gains are applied element-wise
    /// and the result is clamped per axis: horizontal components
    /// symmetrically, the vertical component asymmetrically since ascent and
    /// descent rates differ.
    ///
    /// # Arguments
    ///
    /// * `pos_ref` - Desired position [x, y, z] in m (world frame, z up)
    /// * `pos` - Current position [x, y, z] in m
    ///
    /// # Returns
    ///
    /// Velocity reference [vx, vy, vz] in m/s
    ///
    /// # Control Law
    ///
    /// v_ref = Kp_pos ⊙ (pos_ref - pos), clamped to
    /// [-max_vel_xy, max_vel_xy]² × [-max_vel_z_down, max_vel_z_up]
    ///
    /// # Example
    ///
    /// let vel_ref = controller.position_control(
    ///     &Vector3::new(0.0, 0.0, 2.1),
    ///     &Vector3::zeros(),
    /// );
    pub fn position_control(&self, pos_ref: &Vector3<f64>, pos: &Vector3<f64>) -> Vector3<f64> {
        let vel_ref = self.kp_pos.component_mul(&(pos_ref - pos));

        Vector3::new(
            vel_ref.x.clamp(-self.max_vel_xy, self.max_vel_xy),
            vel_ref.y.clamp(-self.max_vel_xy, self.max_vel_xy),
            vel_ref.z.clamp(-self.max_vel_z_down, self.max_vel_z_up),
        )
    }

    /// Calculates the desired acceleration from the velocity error.
    ///
    /// Discrete PID on `e = vel_ref - vel`. Each call is one tick: the
    /// previous error is shifted out, the accumulator grows by `e * dt` and
    /// the derivative is the backward difference of the two errors. The
    /// first call therefore differentiates against a zero error.
    ///
    /// # Arguments
    ///
    /// * `vel_ref` - Velocity reference [vx, vy, vz] in m/s
    /// * `vel` - Measured velocity [vx, vy, vz] in m/s
    ///
    /// # Returns
    ///
    /// Desired acceleration [ax, ay, az] in m/s², gravity not included
    ///
    /// # Control Law
    ///
    /// a = Kp ⊙ e + Ki ⊙ ∫e dt + Kd ⊙ (e - e_prev) / dt
    ///
    /// # Notes
    ///
    /// With an integral limit configured the accumulator is clamped after
    /// every update. Without one it grows without bound.
    pub fn velocity_control(&mut self, vel_ref: &Vector3<f64>, vel: &Vector3<f64>) -> Vector3<f64> {
        self.vel_err_prev = self.vel_err;
        self.vel_err = vel_ref - vel;
        self.integrated_vel_error += self.vel_err * self.dt;

        if let Some(limit) = self.integral_limit {
            self.integrated_vel_error = self
                .integrated_vel_error
                .zip_map(&limit, |e, l| e.clamp(-l, l));
        }

        let derivative = (self.vel_err - self.vel_err_prev) / self.dt;

        self.kp_vel.component_mul(&self.vel_err)
            + self.ki_vel.component_mul(&self.integrated_vel_error)
            + self.kd_vel.component_mul(&derivative)
    }

    /// Runs both stages for one tick.
    ///
    /// # Arguments
    ///
    /// * `reference` - Setpoint of the current tick
    /// * `state` - Current state sample
    ///
    /// # Returns
    ///
    /// `(vel_ref, acc_ref)`: the clamped velocity reference and the desired
    /// acceleration, both in the world frame with gravity not included
    ///
    /// # Notes
    ///
    /// A velocity feedforward carried by the reference is used for thrust
    /// compensation only; the velocity stage always tracks the output of the
    /// position stage.
    pub fn run_control(
        &mut self,
        reference: &Reference,
        state: &StateSample,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let vel_ref = self.position_control(&reference.position, &state.position);
        let acc_ref = self.velocity_control(&vel_ref, &state.velocity);

        (vel_ref, acc_ref)
    }
}
