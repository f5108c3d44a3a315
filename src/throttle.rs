use crate::config::ThrottleParams;

/// Linear relation between collective thrust and the normalized throttle
/// signal accepted by the flight-control unit.
///
/// The relation was fitted on a static thrust stand:
///
/// throttle = 0.02394 * thrust + 0.1644
///
/// Thrust at or above `max_thrust` saturates to full throttle and negative
/// thrust maps to zero. Between those bounds the fit is applied unchanged,
/// so it reaches slightly above 1.0 in the last percent below `max_thrust`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThrottleModel {
    /// Throttle per Newton
    slope: f64,
    /// Throttle at zero thrust
    offset: f64,
    /// Collective thrust at full throttle (N)
    max_thrust: f64,
}

impl Default for ThrottleModel {
    fn default() -> Self {
        Self::from_params(&ThrottleParams::default())
    }
}

impl ThrottleModel {
    pub fn new(slope: f64, offset: f64, max_thrust: f64) -> Self {
        Self {
            slope,
            offset,
            max_thrust,
        }
    }

    pub fn from_params(params: &ThrottleParams) -> Self {
        Self::new(params.slope, params.offset, params.max_thrust)
    }

    pub fn max_thrust(&self) -> f64 {
        self.max_thrust
    }

    /// Maps a collective thrust in Newtons to a throttle.
    ///
    /// Total over every input: NaN is treated like negative thrust.
    pub fn thrust_to_throttle(&self, thrust: f64) -> f64 {
        if thrust >= self.max_thrust {
            return 1.0;
        }
        if thrust < 0.0 || thrust.is_nan() {
            return 0.0;
        }
        self.slope * thrust + self.offset
    }

    /// Inverse of [`thrust_to_throttle`](Self::thrust_to_throttle) on its linear
    /// segment, used by the simulated vehicle to turn a command back into force.
    ///
    /// Throttle below the zero-thrust offset produces no thrust.
    pub fn throttle_to_thrust(&self, throttle: f64) -> f64 {
        let throttle = throttle.clamp(0.0, 1.0);
        if throttle <= self.offset {
            return 0.0;
        }
        ((throttle - self.offset) / self.slope).min(self.max_thrust)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_saturates_above_max_thrust() {
        let model = ThrottleModel::default();
        assert_eq!(model.thrust_to_throttle(model.max_thrust()), 1.0);
        assert_eq!(model.thrust_to_throttle(40.0), 1.0);
        assert_eq!(model.thrust_to_throttle(1e9), 1.0);
        assert_eq!(model.thrust_to_throttle(f64::INFINITY), 1.0);
    }

    #[test]
    fn test_negative_thrust_is_zero() {
        let model = ThrottleModel::default();
        assert_eq!(model.thrust_to_throttle(-0.001), 0.0);
        assert_eq!(model.thrust_to_throttle(-50.0), 0.0);
        assert_eq!(model.thrust_to_throttle(f64::NEG_INFINITY), 0.0);
        assert_eq!(model.thrust_to_throttle(f64::NAN), 0.0);
    }

    #[test]
    fn test_linear_segment_is_exact() {
        let model = ThrottleModel::default();
        for thrust in [0.0, 1.0, 5.5, 14.715, 20.0, 30.0, 34.0, 35.0, 35.9] {
            assert_eq!(model.thrust_to_throttle(thrust), 0.02394 * thrust + 0.1644);
        }
    }

    #[test]
    fn test_fit_not_capped_below_max_thrust() {
        let model = ThrottleModel::default();
        assert_relative_eq!(model.thrust_to_throttle(35.0), 1.0023, epsilon = 1e-12);
        assert_relative_eq!(model.thrust_to_throttle(35.9), 1.023846, epsilon = 1e-12);
        assert_eq!(model.thrust_to_throttle(model.max_thrust()), 1.0);
    }

    #[test]
    fn test_monotonic_below_max_thrust() {
        let model = ThrottleModel::default();
        let mut last = model.thrust_to_throttle(-1.0);
        let mut thrust = -1.0;
        while thrust < model.max_thrust() {
            let throttle = model.thrust_to_throttle(thrust);
            assert!(throttle >= last, "not monotonic at {thrust}");
            assert!(throttle >= 0.0);
            last = throttle;
            thrust += 0.01;
        }
    }

    #[test]
    fn test_inverse_on_linear_segment() {
        let model = ThrottleModel::default();
        let hover = 1.5 * 9.81;
        let throttle = model.thrust_to_throttle(hover);
        assert_relative_eq!(model.throttle_to_thrust(throttle), hover, epsilon = 1e-9);
        assert_eq!(model.throttle_to_thrust(0.0), 0.0);
        assert_eq!(model.throttle_to_thrust(0.1), 0.0);
    }
}
