//! Seams between the control loop and the outside world.
//!
//! The loop reads the newest state sample from a [`StateSource`], emits a
//! [`Command`] to a [`CommandSink`] and hands flight records to a
//! [`RecordSink`]. The provided implementations are channel based so that
//! a telemetry task can run next to the loop without sharing any state.

use std::fmt;

use log::{debug, info};
use nalgebra::Vector3;
use thiserror::Error;
use tokio::sync::{mpsc, watch};

use crate::command::Command;
use crate::state::StateSample;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    #[error("no state sample has been published yet")]
    NoSample,
    #[error("state source closed")]
    SourceClosed,
    #[error("command sink closed")]
    SinkClosed,
    #[error("command sink is full, command dropped")]
    SinkFull,
    #[error("command rejected by the flight-control unit")]
    Rejected,
}

/// Provider of the latest vehicle state.
///
/// `read` may return the same sample on consecutive calls when telemetry
/// is slower than the loop.
#[allow(async_fn_in_trait)]
pub trait StateSource {
    async fn read(&mut self) -> Result<StateSample, TransportError>;
}

/// Consumer of setpoints. Delivery is fire and forget.
#[allow(async_fn_in_trait)]
pub trait CommandSink {
    async fn send(&mut self, command: Command) -> Result<(), TransportError>;
}

/// Consumer of per-tick flight records.
pub trait RecordSink {
    fn record(&mut self, record: &TelemetryRecord);
}

impl RecordSink for Vec<TelemetryRecord> {
    fn record(&mut self, record: &TelemetryRecord) {
        self.push(*record);
    }
}

/// Flat per-tick record for offline analysis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TelemetryRecord {
    /// Elapsed session time (s)
    pub t: f64,
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Roll, pitch, yaw as reported (degrees)
    pub euler_deg: Vector3<f64>,
    pub angular_velocity: Vector3<f64>,
    pub actuator_controls: [f64; 4],
}

impl TelemetryRecord {
    pub const CSV_HEADER: &'static str =
        "t,x,y,z,vx,vy,vz,roll,pitch,yaw,p,q,r,u0,u1,u2,u3";

    /// Builds a record; samples without actuator outputs are not recorded.
    pub fn from_sample(t: f64, sample: &StateSample) -> Option<Self> {
        Some(Self {
            t,
            position: sample.position,
            velocity: sample.velocity,
            euler_deg: sample.euler_deg,
            angular_velocity: sample.angular_velocity,
            actuator_controls: sample.actuator_controls?,
        })
    }
}

impl fmt::Display for TelemetryRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.t)?;
        let vectors = [
            &self.position,
            &self.velocity,
            &self.euler_deg,
            &self.angular_velocity,
        ];
        for v in vectors {
            write!(f, ",{},{},{}", v.x, v.y, v.z)?;
        }
        for u in &self.actuator_controls {
            write!(f, ",{}", u)?;
        }
        Ok(())
    }
}

/// Writes records as comma-separated lines on the `quad_control::record`
/// log target. The header is written before the first record.
#[derive(Debug, Default)]
pub struct LogRecordSink {
    header_written: bool,
}

impl LogRecordSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RecordSink for LogRecordSink {
    fn record(&mut self, record: &TelemetryRecord) {
        if !self.header_written {
            info!(target: "quad_control::record", "{}", TelemetryRecord::CSV_HEADER);
            self.header_written = true;
        }
        info!(target: "quad_control::record", "{}", record);
    }
}

/// Creates a single-slot sample buffer. The publisher overwrites the slot;
/// the reader always sees the newest sample and never a backlog.
pub fn latest_sample() -> (SamplePublisher, LatestSample) {
    let (tx, rx) = watch::channel(None);
    (SamplePublisher { tx }, LatestSample { rx, reads: 0 })
}

/// Writing half of [`latest_sample`].
#[derive(Debug, Clone)]
pub struct SamplePublisher {
    tx: watch::Sender<Option<StateSample>>,
}

impl SamplePublisher {
    pub fn publish(&self, sample: impl Into<StateSample>) {
        self.tx.send_replace(Some(sample.into()));
    }
}

/// Reading half of [`latest_sample`].
#[derive(Debug)]
pub struct LatestSample {
    rx: watch::Receiver<Option<StateSample>>,
    reads: u64,
}

impl StateSource for LatestSample {
    async fn read(&mut self) -> Result<StateSample, TransportError> {
        let fresh = self
            .rx
            .has_changed()
            .map_err(|_| TransportError::SourceClosed)?;
        let sample = (*self.rx.borrow_and_update()).ok_or(TransportError::NoSample)?;

        self.reads += 1;
        if !fresh {
            debug!("stale state sample on read {}", self.reads);
        }
        Ok(sample)
    }
}

/// Forwards commands over a bounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<Command>,
}

impl ChannelSink {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Command>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }
}

impl CommandSink for ChannelSink {
    async fn send(&mut self, command: Command) -> Result<(), TransportError> {
        self.tx.try_send(command).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => TransportError::SinkFull,
            mpsc::error::TrySendError::Closed(_) => TransportError::SinkClosed,
        })
    }
}
