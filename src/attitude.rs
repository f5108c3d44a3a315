//! Attitude synthesis: desired acceleration and yaw to a target body frame,
//! Euler angles and collective thrust.

use nalgebra::{Matrix3, Vector3};
use thiserror::Error;

/// Norm below which a vector is treated as zero during synthesis.
pub const DEGENERATE_NORM: f64 = 1e-6;

#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum SynthesisError {
    #[error("desired acceleration {0:?} is too small to define a thrust axis")]
    Degenerate(Vector3<f64>),
    #[error("thrust axis is parallel to the yaw-aligned axis, heading is undefined")]
    Gimbal,
    #[error("non-finite attitude target")]
    NonFinite,
}

/// Target orientation derived for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttitudeTarget {
    /// `[x_b | y_b | z_b]`
    pub body_frame: Matrix3<f64>,
    /// Roll, pitch, yaw about X-Y-Z (rad)
    pub euler: Vector3<f64>,
}

/// Builds the orthonormal target body frame.
///
/// `z_b` points along the desired specific force and `x_b` is chosen
/// perpendicular to the yaw-aligned horizontal axis
/// `y_c = (-sin yaw, cos yaw, 0)`.
///
/// # Errors
///
/// [`SynthesisError::Degenerate`] when `|acc| < 1e-6` and
/// [`SynthesisError::Gimbal`] when `z_b` is parallel to `y_c`.
pub fn reference_body_frame(acc: &Vector3<f64>, yaw: f64) -> Result<Matrix3<f64>, SynthesisError> {
    if !acc.iter().all(|v| v.is_finite()) || !yaw.is_finite() {
        return Err(SynthesisError::NonFinite);
    }
    if acc.norm() < DEGENERATE_NORM {
        return Err(SynthesisError::Degenerate(*acc));
    }

    let y_c = Vector3::new(-yaw.sin(), yaw.cos(), 0.0);
    let z_b = acc.normalize();
    let x_b = y_c.cross(&z_b);
    if x_b.norm() < DEGENERATE_NORM {
        return Err(SynthesisError::Gimbal);
    }
    let x_b = x_b.normalize();
    let y_b = z_b.cross(&x_b);

    Ok(Matrix3::from_columns(&[x_b, y_b, z_b]))
}

/// Decomposes a rotation matrix into angles `(a, b, c)` such that
/// `m = Rx(a) · Ry(b) · Rz(c)`.
///
/// The first angle is returned in `[0, π]` and the other two in `[-π, π]`.
pub fn euler_xyz(m: &Matrix3<f64>) -> Vector3<f64> {
    let mut a = m[(1, 2)].atan2(m[(2, 2)]);
    let c2 = m[(0, 0)].hypot(m[(0, 1)]);
    let b = if a > 0.0 {
        a -= std::f64::consts::PI;
        (-m[(0, 2)]).atan2(-c2)
    } else {
        (-m[(0, 2)]).atan2(c2)
    };
    let (s1, c1) = a.sin_cos();
    let c = (s1 * m[(2, 0)] - c1 * m[(1, 0)]).atan2(c1 * m[(1, 1)] - s1 * m[(2, 1)]);

    -Vector3::new(a, b, c)
}

/// Target body frame and its Euler angles for a desired specific force.
pub fn synthesize(acc: &Vector3<f64>, yaw: f64) -> Result<AttitudeTarget, SynthesisError> {
    let body_frame = reference_body_frame(acc, yaw)?;
    let euler = euler_xyz(&body_frame);
    if !euler.iter().all(|v| v.is_finite()) {
        return Err(SynthesisError::NonFinite);
    }

    Ok(AttitudeTarget { body_frame, euler })
}

/// Collective thrust (N): `acc` projected on the current body z-axis,
/// scaled by mass.
pub fn collective_thrust(acc: &Vector3<f64>, current_body_frame: &Matrix3<f64>, mass: f64) -> f64 {
    acc.dot(&current_body_frame.column(2)) * mass
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Rotation3;

    fn assert_orthonormal(m: &Matrix3<f64>) {
        assert_relative_eq!(m.transpose() * m, Matrix3::identity(), epsilon = 1e-12);
        assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_vertical_acceleration_gives_level_attitude() {
        for k in [0.1, 1.0, 9.81, 30.0] {
            let target = synthesize(&Vector3::new(0.0, 0.0, k), 0.0).unwrap();
            assert_relative_eq!(target.body_frame, Matrix3::identity(), epsilon = 1e-12);
            assert_relative_eq!(target.euler, Vector3::zeros(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_zero_acceleration_is_degenerate() {
        // Hover reference after gravity subtraction with the vehicle at rest
        let acc = Vector3::new(0.0, 0.0, 9.81) - Vector3::new(0.0, 0.0, 9.81);
        assert!(matches!(
            synthesize(&acc, 0.0),
            Err(SynthesisError::Degenerate(_))
        ));
        assert!(reference_body_frame(&Vector3::new(1e-9, 0.0, 0.0), 0.0).is_err());
    }

    #[test]
    fn test_thrust_along_yaw_axis_is_rejected() {
        assert_eq!(
            reference_body_frame(&Vector3::new(0.0, 3.0, 0.0), 0.0),
            Err(SynthesisError::Gimbal)
        );
    }

    #[test]
    fn test_non_finite_is_rejected() {
        assert_eq!(
            synthesize(&Vector3::new(f64::NAN, 0.0, 1.0), 0.0),
            Err(SynthesisError::NonFinite)
        );
        assert_eq!(
            synthesize(&Vector3::new(0.0, 0.0, 1.0), f64::INFINITY),
            Err(SynthesisError::NonFinite)
        );
    }

    #[test]
    fn test_pitch_follows_forward_acceleration() {
        let forward = synthesize(&Vector3::new(2.0, 0.0, 9.81), 0.0).unwrap();
        assert!(forward.euler.y > 0.0);
        assert_relative_eq!(forward.euler.y, 2.0_f64.atan2(9.81), epsilon = 1e-12);
        assert_relative_eq!(forward.euler.x, 0.0, epsilon = 1e-12);
        assert_relative_eq!(forward.euler.z, 0.0, epsilon = 1e-12);

        let backward = synthesize(&Vector3::new(-2.0, 0.0, 9.81), 0.0).unwrap();
        assert!(backward.euler.y < 0.0);
    }

    #[test]
    fn test_body_frame_is_orthonormal() {
        let cases = [
            (Vector3::new(1.0, 2.0, 3.0), 0.0),
            (Vector3::new(-4.0, 0.5, 9.0), 1.2),
            (Vector3::new(0.3, -0.7, -2.0), -2.5),
            (Vector3::new(5.0, 5.0, 0.1), 3.0),
        ];
        for (acc, yaw) in cases {
            let m = reference_body_frame(&acc, yaw).unwrap();
            assert_orthonormal(&m);
            assert_relative_eq!(m.column(2).into_owned(), acc.normalize(), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_euler_decomposition_reconstructs_matrix() {
        let cases = [
            (Vector3::new(1.0, 2.0, 3.0), 0.0),
            (Vector3::new(0.0, 0.4, 9.0), 0.0),
            (Vector3::new(-4.0, 0.5, 9.0), 1.2),
            (Vector3::new(0.3, -0.7, -2.0), -2.5),
        ];
        for (acc, yaw) in cases {
            let target = synthesize(&acc, yaw).unwrap();
            let e = target.euler;
            assert!((0.0..=std::f64::consts::PI).contains(&e.x));
            let rebuilt = Rotation3::from_axis_angle(&Vector3::x_axis(), e.x)
                * Rotation3::from_axis_angle(&Vector3::y_axis(), e.y)
                * Rotation3::from_axis_angle(&Vector3::z_axis(), e.z);
            assert_relative_eq!(rebuilt.into_inner(), target.body_frame, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_collective_thrust_uses_current_frame() {
        let level = Matrix3::identity();
        assert_relative_eq!(
            collective_thrust(&Vector3::new(0.0, 0.0, 1.0 - 9.81), &level, 1.5),
            (1.0 - 9.81) * 1.5
        );

        let tilted = Rotation3::from_axis_angle(&Vector3::y_axis(), 0.5).into_inner();
        let acc = Vector3::new(1.0, 0.0, 10.0);
        assert_relative_eq!(
            collective_thrust(&acc, &tilted, 2.0),
            (1.0 * 0.5_f64.sin() + 10.0 * 0.5_f64.cos()) * 2.0,
            epsilon = 1e-12
        );
    }
}
