//! Shiptrace: capture coordination engine for a tracking API response
//! observed through a rendered browser page.
//!
//! The flow is strictly one-way: [`Installer`] arms hooks before
//! navigation, [`Coordinator`] polls the capture strategies until one is
//! conclusive, and [`assess`] validates and normalizes the result into a
//! [`TrackingSummary`].

pub mod assess;
pub mod config;
pub mod coordinator;
pub mod installer;
pub mod normalize;
pub mod poll;
pub mod progress;
pub mod session;
pub mod strategy;
pub mod types;
pub mod validate;

pub use assess::{assess, prefer_captured, Assessment, SummarySource};
pub use config::CaptureConfig;
pub use coordinator::{CaptureReport, Coordinator, CoordinatorState};
pub use installer::{Installer, Instrumentation};
pub use normalize::{normalize, LocationIndex};
pub use poll::{PollPolicy, PollStop, Poller};
pub use session::{CaptureSession, ProtocolResponse};
pub use types::*;
pub use validate::{validate, Decision};

pub use tokio_util::sync::CancellationToken;
