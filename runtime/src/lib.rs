//! Shiptrace runtime: the browser, report and CLI side of shiptrace.
//!
//! The capture engine itself lives in the `shiptrace` crate; this crate
//! supplies its collaborators: a Chromium page session, the DOM fallback,
//! report files, HTTP delivery and the sequential batch runner.

pub mod batch;
pub mod cli;
pub mod delivery;
pub mod dom;
pub mod record;
pub mod renderer;
pub mod report;
pub mod schedule;
pub mod settings;
pub mod subjects;
