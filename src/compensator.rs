//! Thrust compensation for ground effect and forward flight.
//!
//! Every model scales a commanded collective thrust by a factor that depends
//! on the height above ground `z` and, for the dynamic models, the forward
//! speed `v`. The arithmetic of each model is kept in the order the models
//! were fitted so regression values reproduce exactly.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{Config, VehicleParams};

/// Kan's `50/3` speed coefficient, evaluated with integer division.
/// The published regression data was produced with the truncated value.
const KAN_SPEED_COEFFICIENT: f64 = (50 / 3) as f64;

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum CompensatorError {
    #[error("height above ground must be non-zero and finite, got {0}")]
    InvalidHeight(f64),
    #[error("forward speed must be finite, got {0}")]
    InvalidSpeed(f64),
    #[error("thrust must be finite, got {0}")]
    InvalidThrust(f64),
    #[error("{model:?} produced a non-finite thrust at z = {height}, v = {speed}")]
    NonFinite {
        model: GroundEffectModel,
        height: f64,
        speed: f64,
    },
}

/// Available compensation models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroundEffectModel {
    /// Cheeseman & Bennett single-rotor image model
    Cheeseman,
    /// Cheeseman with an equivalent radius of 2.5 R for four rotors
    Nobahari,
    /// Hayden's empirical power-law fit
    Hayden,
    /// Sanchez multi-rotor model using the rotor separation
    Sanchez,
    /// Exponential fit on measured static thrust
    Appius,
    /// Cheeseman attenuated by forward speed over the hover induced velocity
    CheesemanDynamic,
    /// Kan's forward-flight model
    KanDynamic,
}

impl GroundEffectModel {
    pub const ALL: [GroundEffectModel; 7] = [
        GroundEffectModel::Cheeseman,
        GroundEffectModel::Nobahari,
        GroundEffectModel::Hayden,
        GroundEffectModel::Sanchez,
        GroundEffectModel::Appius,
        GroundEffectModel::CheesemanDynamic,
        GroundEffectModel::KanDynamic,
    ];

    /// True for models that use the forward speed.
    pub fn is_dynamic(&self) -> bool {
        matches!(
            self,
            GroundEffectModel::CheesemanDynamic | GroundEffectModel::KanDynamic
        )
    }
}

/// Proximity and speed context a thrust correction is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FlightCondition {
    /// Height of the rotor plane above ground (m)
    pub height: f64,
    /// Horizontal speed (m/s)
    pub forward_speed: f64,
}

impl FlightCondition {
    pub fn hover(height: f64) -> Self {
        Self {
            height,
            forward_speed: 0.0,
        }
    }
}

/// Anything that corrects a thrust estimate for its flight condition.
pub trait ThrustCompensator {
    fn compensate(&self, thrust: f64, condition: &FlightCondition) -> Result<f64, CompensatorError>;
}

/// Induced velocity of one rotor in hover:
///
/// v_h = sqrt(T_h / (2 ρ π R)), with T_h = m g / 4
pub fn hover_induced_velocity(vehicle: &VehicleParams) -> f64 {
    let hover_thrust = vehicle.mass * vehicle.gravity / 4.0;
    (hover_thrust / (2.0 * vehicle.air_density * PI * vehicle.rotor_radius)).sqrt()
}

/// A [`GroundEffectModel`] bound to the airframe constants it needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Compensator {
    model: GroundEffectModel,
    rotor_radius: f64,
    rotor_distance: f64,
    sanchez_constant: f64,
    /// Hover induced velocity, computed once
    v_h: f64,
}

impl Compensator {
    pub fn new(model: GroundEffectModel, vehicle: &VehicleParams, sanchez_constant: f64) -> Self {
        Self {
            model,
            rotor_radius: vehicle.rotor_radius,
            rotor_distance: vehicle.rotor_distance,
            sanchez_constant,
            v_h: hover_induced_velocity(vehicle),
        }
    }

    /// The compensator selected by the configuration, if any.
    pub fn from_config(config: &Config) -> Option<Self> {
        config
            .compensation
            .model
            .map(|model| Self::new(model, &config.vehicle, config.compensation.sanchez_constant))
    }

    pub fn model(&self) -> GroundEffectModel {
        self.model
    }

    pub fn hover_induced_velocity(&self) -> f64 {
        self.v_h
    }

    fn evaluate(&self, thrust_ref: f64, z: f64, v: f64) -> f64 {
        let r = self.rotor_radius;
        match self.model {
            GroundEffectModel::Cheeseman => thrust_ref * (1.0 - (r / (4.0 * z)).powi(2)),
            GroundEffectModel::Nobahari => thrust_ref * (1.0 - (2.5 * r / (4.0 * z)).powi(2)),
            GroundEffectModel::Hayden => {
                thrust_ref * (0.9926 + 0.03794 * 4.0 * r * r / (z * z)).powf(-2.0 / 3.0)
            }
            GroundEffectModel::Sanchez => {
                let d = self.rotor_distance;
                thrust_ref
                    * (1.0
                        - (r / (4.0 * z)).powi(2)
                        - r * r * (z / (d * d + 4.0 * z * z).powf(3.0).powf(0.5))
                        - 0.5
                            * r
                            * r
                            * (z / (2.0 * d * d + 4.0 * z * z).powf(3.0).powf(0.5)
                                * self.sanchez_constant))
            }
            GroundEffectModel::Appius => {
                thrust_ref / (0.11413538 * (-5.38792044 * z).exp() + 1.0275278)
            }
            GroundEffectModel::CheesemanDynamic => {
                thrust_ref
                    * (1.0 - ((r / (4.0 * z)).powi(2) / (1.0 + (v / self.v_h).powi(2))))
            }
            GroundEffectModel::KanDynamic => {
                thrust_ref
                    * ((1.0 + KAN_SPEED_COEFFICIENT * (v / self.v_h).powf(3.0))
                        / (1.0 - ((3.0 * r) / (25.0 * z))))
            }
        }
    }
}

impl ThrustCompensator for Compensator {
    /// Rejects `z == 0` and non-finite inputs instead of letting a division
    /// by zero reach the command stream.
    fn compensate(&self, thrust: f64, condition: &FlightCondition) -> Result<f64, CompensatorError> {
        let FlightCondition {
            height,
            forward_speed,
        } = *condition;

        if !thrust.is_finite() {
            return Err(CompensatorError::InvalidThrust(thrust));
        }
        if height == 0.0 || !height.is_finite() {
            return Err(CompensatorError::InvalidHeight(height));
        }
        if !forward_speed.is_finite() {
            return Err(CompensatorError::InvalidSpeed(forward_speed));
        }

        let compensated = self.evaluate(thrust, height, forward_speed);
        if compensated.is_finite() {
            Ok(compensated)
        } else {
            Err(CompensatorError::NonFinite {
                model: self.model,
                height,
                speed: forward_speed,
            })
        }
    }
}
