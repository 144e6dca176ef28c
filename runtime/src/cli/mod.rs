//! CLI subcommand implementations for the shiptrace binary.

pub mod doctor;
pub mod output;
pub mod track;
