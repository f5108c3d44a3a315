//! Outer-loop flight control for a quadrotor.
//!
//! Each tick a [`StateSample`] is turned into a setpoint for the
//! flight-control unit:
//!
//! state → [`reference`] → [`control`] (position, velocity) → [`attitude`]
//! → [`throttle`] → [`command`]
//!
//! [`driver::ControlLoop`] owns the controller state and runs the loop at a
//! fixed rate against the [`transport`] traits. [`compensator`] corrects the
//! collective thrust for ground effect and forward flight, and [`sim`]
//! provides a simulated vehicle to fly against.

pub mod attitude;
pub mod command;
pub mod compensator;
pub mod config;
pub mod control;
pub mod driver;
pub mod reference;
pub mod sim;
pub mod state;
pub mod throttle;
pub mod transport;

pub use command::{Command, CommandMode};
pub use config::{Config, ConfigError};
pub use driver::{shutdown_channel, ControlLoop, RunSummary, Shutdown, ShutdownHandle};
pub use reference::{ReferenceGenerator, Trajectory};
pub use state::{NedTelemetry, Reference, StateSample};
