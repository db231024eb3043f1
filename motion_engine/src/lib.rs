//! Generic polling and transaction engine for multi-axis motion controllers.
//!
//! A [`Controller`] owns one card: a vendor [`ControllerDriver`], the
//! transport it talks over and a [`Poller`] thread that samples every axis,
//! infers done/limit state and publishes [`AxisStatus`] snapshots. Commands
//! go out through [`Transaction`]s built from [`MotionPrimitive`]s.

mod card;
pub mod channel;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
pub mod health;
pub mod inference;
pub mod limits;
pub mod poller;
pub mod primitive;
pub mod registry;
pub mod status;
pub mod transaction;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use config::{AxisConfig, CardConfig, PollPeriods, PollerConfig};
pub use controller::Controller;
pub use driver::{Capabilities, CommandFormatter, ControllerDriver, Frame, StatusQuery};
pub use error::{EngineError, FormatError};
pub use health::CommHealth;
pub use poller::{AxisPoll, CycleReport, Poller};
pub use primitive::{MessageType, MotionPrimitive};
pub use registry::{CardId, ControllerRegistry};
pub use status::{AxisSample, AxisStatus, Direction, MotionRequest, MotionTarget, StatusFlags};
pub use transaction::{Accepted, Transaction, TransactionState};
