//! The fixed-rate control loop.
//!
//! [`ControlLoop::step`] is one synchronous pass: reference, position and
//! velocity stages, attitude synthesis, throttle. [`ControlLoop::run`]
//! repeats it against a [`StateSource`] and a [`CommandSink`] until a
//! [`Shutdown`] is requested, then holds the last observed position for a
//! configured number of ticks.

use log::{debug, info, warn};
use nalgebra::Vector3;
use thiserror::Error;
use tokio::sync::watch;

use crate::attitude::{collective_thrust, synthesize, SynthesisError};
use crate::command::{
    AccelerationNedCommand, AttitudeThrustCommand, Command, CommandMode, VelocityNedCommand,
};
use crate::compensator::{Compensator, FlightCondition, ThrustCompensator};
use crate::config::{Config, ConfigError};
use crate::control::CascadedController;
use crate::reference::{Phase, ReferenceGenerator, Trajectory};
use crate::state::{Reference, StateSample};
use crate::throttle::ThrottleModel;
use crate::transport::{CommandSink, LogRecordSink, RecordSink, StateSource, TelemetryRecord};

/// Why a tick produced no new command.
#[derive(Debug, Error, Clone, Copy, PartialEq)]
pub enum StepError {
    #[error("state sample contains non-finite values")]
    NonFiniteSample,
    #[error(transparent)]
    Synthesis(#[from] SynthesisError),
    #[error("computed command is not finite")]
    NonFiniteCommand,
}

/// Everything computed during one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickOutput {
    pub tick: u64,
    /// Elapsed session time (s)
    pub t: f64,
    pub reference: Reference,
    pub vel_ref: Vector3<f64>,
    /// Desired acceleration with gravity subtracted from z
    pub acc_ref: Vector3<f64>,
    /// Collective thrust after compensation (N)
    pub thrust: f64,
    pub throttle: f64,
    pub command: Command,
}

/// Counters reported when [`ControlLoop::run`] returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub ticks: u64,
    pub commands_sent: u64,
    /// Ticks that re-sent the last good command
    pub held_commands: u64,
    pub read_failures: u64,
    pub send_failures: u64,
    /// Ticks whose computation was rejected
    pub faults: u64,
    /// Ticks spent holding position after shutdown was requested
    pub hold_ticks: u64,
}

/// Creates a cancellation pair.
pub fn shutdown_channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx })
}

/// Requests a graceful stop of a running loop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn is_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Completes once shutdown is requested. Never completes if every
    /// handle is dropped without triggering.
    pub async fn requested(&mut self) {
        if self.rx.wait_for(|stop| *stop).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Owns the controller error state and drives one control session.
pub struct ControlLoop<G, R = LogRecordSink> {
    config: Config,
    controller: CascadedController,
    throttle: ThrottleModel,
    compensator: Option<Compensator>,
    generator: G,
    recorder: R,
    tick: u64,
    last_command: Option<Command>,
    last_position: Option<Vector3<f64>>,
    last_phase: Option<Phase>,
    hold_target: Option<Reference>,
}

impl ControlLoop<Trajectory> {
    /// Loop following the trajectory named in the configuration.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(config, config.trajectory)
    }
}

impl<G: ReferenceGenerator> ControlLoop<G> {
    /// Validates `config` and builds a loop; nothing is constructed when the
    /// configuration is invalid.
    pub fn new(config: &Config, generator: G) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            config: config.clone(),
            controller: CascadedController::from_config(config),
            throttle: ThrottleModel::from_params(&config.throttle),
            compensator: Compensator::from_config(config),
            generator,
            recorder: LogRecordSink::new(),
            tick: 0,
            last_command: None,
            last_position: None,
            last_phase: None,
            hold_target: None,
        })
    }
}

impl<G: ReferenceGenerator, R: RecordSink> ControlLoop<G, R> {
    /// Replaces the flight record sink.
    pub fn with_recorder<R2: RecordSink>(self, recorder: R2) -> ControlLoop<G, R2> {
        ControlLoop {
            config: self.config,
            controller: self.controller,
            throttle: self.throttle,
            compensator: self.compensator,
            generator: self.generator,
            recorder,
            tick: self.tick,
            last_command: self.last_command,
            last_position: self.last_position,
            last_phase: self.last_phase,
            hold_target: self.hold_target,
        }
    }

    pub fn recorder(&self) -> &R {
        &self.recorder
    }

    pub fn controller(&self) -> &CascadedController {
        &self.controller
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Elapsed session time of the next tick (s).
    pub fn elapsed(&self) -> f64 {
        self.tick as f64 * self.config.tick_ms as f64 / 1000.0
    }

    /// Last command that passed every check.
    pub fn last_command(&self) -> Option<Command> {
        self.last_command
    }

    /// Advances time without computing, for ticks without a state sample.
    pub fn skip_tick(&mut self) {
        self.tick += 1;
    }

    /// Computes one tick from `sample`.
    ///
    /// Time advances even when an error is returned. On error the controller
    /// keeps its updated error state and the previous command stays current;
    /// see [`last_command`](Self::last_command).
    pub fn step(&mut self, sample: &StateSample) -> Result<TickOutput, StepError> {
        let tick = self.tick;
        let t = self.elapsed();
        self.tick += 1;

        if !sample.is_finite() {
            return Err(StepError::NonFiniteSample);
        }
        self.last_position = Some(sample.position);

        let reference = match self.hold_target {
            Some(target) => target,
            None => {
                self.track_phase(t);
                self.generator.generate(t, &sample.position)
            }
        };

        if self.config.record_window.contains(t) {
            if let Some(record) = TelemetryRecord::from_sample(t, sample) {
                self.recorder.record(&record);
            }
        }

        let (vel_ref, acc_kinematic) = self.controller.run_control(&reference, sample);
        let mut acc_ref = acc_kinematic;
        acc_ref.z -= self.config.vehicle.gravity;

        let thrust = collective_thrust(&acc_ref, &sample.body_frame(), self.config.vehicle.mass);
        let thrust = self.compensate(thrust, &reference, sample);
        let throttle = self.throttle.thrust_to_throttle(thrust);

        let command = match self.config.command_mode {
            CommandMode::Attitude => {
                let target = synthesize(&acc_ref, reference.yaw)?;
                Command::Attitude(AttitudeThrustCommand::from_target(&target, throttle))
            }
            CommandMode::Velocity => {
                Command::Velocity(VelocityNedCommand::from_world(&vel_ref, reference.yaw))
            }
            CommandMode::Acceleration => {
                // Kinematic acceleration: the autopilot adds gravity itself
                Command::Acceleration(AccelerationNedCommand::from_world(&acc_kinematic))
            }
        };
        if !command.is_finite() {
            return Err(StepError::NonFiniteCommand);
        }
        self.last_command = Some(command);

        debug!(
            "tick {tick}: t = {t:.2}, vel_ref = {:?}, acc_ref = {:?}, thrust = {thrust:.3}, throttle = {throttle:.3}",
            vel_ref.as_slice(),
            acc_ref.as_slice()
        );

        Ok(TickOutput {
            tick,
            t,
            reference,
            vel_ref,
            acc_ref,
            thrust,
            throttle,
            command,
        })
    }

    fn track_phase(&mut self, t: f64) {
        let Some(phase) = self.generator.phase(t) else {
            return;
        };
        if self.last_phase != Some(phase) {
            info!("t = {t:.2} s: entering {phase:?} phase");
            self.last_phase = Some(phase);
        }
    }

    /// Applies the configured thrust compensation. Falls back to the
    /// uncompensated thrust when the model rejects its input.
    fn compensate(&self, thrust: f64, reference: &Reference, sample: &StateSample) -> f64 {
        let Some(compensator) = &self.compensator else {
            return thrust;
        };

        let condition = FlightCondition {
            height: sample.position.z.max(self.config.compensation.min_height),
            forward_speed: reference.velocity.unwrap_or(sample.velocity).xy().norm(),
        };
        match compensator.compensate(thrust, &condition) {
            Ok(compensated) => compensated,
            Err(e) => {
                warn!("tick {}: {:?} compensation skipped: {e}", self.tick, compensator.model());
                thrust
            }
        }
    }

    /// Re-targets the last observed position with zero yaw. Returns false
    /// when no sample has been seen yet.
    pub fn begin_hold(&mut self) -> bool {
        match self.last_position {
            Some(position) => {
                self.hold_target = Some(Reference::hold(position, 0.0));
                true
            }
            None => false,
        }
    }

    async fn run_tick<S, C>(&mut self, source: &mut S, sink: &mut C, summary: &mut RunSummary)
    where
        S: StateSource,
        C: CommandSink,
    {
        summary.ticks += 1;

        let sample = match source.read().await {
            Ok(sample) => sample,
            Err(e) => {
                warn!("tick {}: t = {:.2} s: state read failed: {e}", self.tick, self.elapsed());
                summary.read_failures += 1;
                self.skip_tick();
                return;
            }
        };

        let command = match self.step(&sample) {
            Ok(output) => output.command,
            Err(e) => {
                summary.faults += 1;
                warn!("tick {}: t = {:.2} s: {e}", self.tick - 1, self.elapsed());
                match self.last_command {
                    Some(held) => {
                        summary.held_commands += 1;
                        held
                    }
                    None => return,
                }
            }
        };

        match sink.send(command).await {
            Ok(()) => summary.commands_sent += 1,
            Err(e) => {
                warn!("tick {}: command not delivered: {e}", self.tick - 1);
                summary.send_failures += 1;
            }
        }
    }

    /// Runs the session until `shutdown` is requested.
    ///
    /// Each tick reads one sample, computes, sends, then sleeps for one tick
    /// period. After shutdown the loop holds the last observed position for
    /// `shutdown_hold_ticks` ticks before returning.
    pub async fn run<S, C>(&mut self, source: &mut S, sink: &mut C, mut shutdown: Shutdown) -> RunSummary
    where
        S: StateSource,
        C: CommandSink,
    {
        let period = self.config.tick_period();
        let mut summary = RunSummary::default();
        info!(
            "control loop started: {} ms period, {:?} commands",
            self.config.tick_ms, self.config.command_mode
        );

        while !shutdown.is_requested() {
            self.run_tick(source, sink, &mut summary).await;

            tokio::select! {
                _ = shutdown.requested() => break,
                _ = tokio::time::sleep(period) => {}
            }
        }

        if self.begin_hold() {
            info!(
                "shutdown at t = {:.2} s, holding position for {} ticks",
                self.elapsed(),
                self.config.shutdown_hold_ticks
            );
            for _ in 0..self.config.shutdown_hold_ticks {
                self.run_tick(source, sink, &mut summary).await;
                summary.hold_ticks += 1;
                tokio::time::sleep(period).await;
            }
        } else {
            info!("shutdown before the first state sample, nothing to hold");
        }

        info!("control loop stopped: {summary:?}");
        summary
    }
}
