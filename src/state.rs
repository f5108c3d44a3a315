use nalgebra::{Matrix3, Quaternion, UnitQuaternion, Vector3};

/// One telemetry sample in the controller's world frame.
///
/// The world frame shares north and east with NED but its third axis
/// points up: `z = -down`. The attitude quaternion is passed through as
/// reported by the flight-control unit (body to NED).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateSample {
    /// Position (m), z up
    pub position: Vector3<f64>,
    /// Velocity (m/s), z up
    pub velocity: Vector3<f64>,
    /// Attitude quaternion as reported
    pub attitude: UnitQuaternion<f64>,
    /// Roll, pitch, yaw as reported (degrees)
    pub euler_deg: Vector3<f64>,
    /// Body angular velocity (rad/s), logging only
    pub angular_velocity: Vector3<f64>,
    /// Normalized actuator outputs of the flight-control unit, when available
    pub actuator_controls: Option<[f64; 4]>,
}

impl Default for StateSample {
    fn default() -> Self {
        Self {
            position: Vector3::zeros(),
            velocity: Vector3::zeros(),
            attitude: UnitQuaternion::identity(),
            euler_deg: Vector3::zeros(),
            angular_velocity: Vector3::zeros(),
            actuator_controls: None,
        }
    }
}

impl StateSample {
    /// Rotation matrix of the current attitude. Its third column is the
    /// current body z-axis used for the thrust projection.
    pub fn body_frame(&self) -> Matrix3<f64> {
        self.attitude.to_rotation_matrix().into_inner()
    }

    /// True when every numeric field is finite.
    pub fn is_finite(&self) -> bool {
        self.position.iter().all(|v| v.is_finite())
            && self.velocity.iter().all(|v| v.is_finite())
            && self.attitude.coords.iter().all(|v| v.is_finite())
    }
}

/// Telemetry as delivered by a NED-based flight-control unit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NedTelemetry {
    /// North, east, down (m)
    pub position_ned: Vector3<f64>,
    /// North, east, down (m/s)
    pub velocity_ned: Vector3<f64>,
    /// Attitude quaternion (w, x, y, z), body to NED
    pub attitude: Quaternion<f64>,
    /// Roll, pitch, yaw (degrees)
    pub euler_deg: Vector3<f64>,
    /// Body rates (rad/s)
    pub angular_velocity_body: Vector3<f64>,
    pub actuator_controls: Option<[f64; 4]>,
}

impl From<NedTelemetry> for StateSample {
    fn from(t: NedTelemetry) -> Self {
        Self {
            position: ned_to_world(&t.position_ned),
            velocity: ned_to_world(&t.velocity_ned),
            attitude: UnitQuaternion::from_quaternion(t.attitude),
            euler_deg: t.euler_deg,
            angular_velocity: t.angular_velocity_body,
            actuator_controls: t.actuator_controls,
        }
    }
}

/// NED to the controller's z-up world frame.
pub fn ned_to_world(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, v.y, -v.z)
}

/// The controller's z-up world frame to NED.
pub fn world_to_ned(v: &Vector3<f64>) -> Vector3<f64> {
    Vector3::new(v.x, v.y, -v.z)
}

/// Setpoint for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reference {
    /// Target position (m), world frame
    pub position: Vector3<f64>,
    /// Target velocity for trajectories that define one
    pub velocity: Option<Vector3<f64>>,
    /// Target yaw (rad)
    pub yaw: f64,
}

impl Reference {
    pub fn hold(position: Vector3<f64>, yaw: f64) -> Self {
        Self {
            position,
            velocity: None,
            yaw,
        }
    }

    pub fn with_velocity(mut self, velocity: Vector3<f64>) -> Self {
        self.velocity = Some(velocity);
        self
    }
}
