//! Output mode flags shared by every subcommand.
//!
//! `main` records the global `--json` and `--quiet` flags in the
//! environment so any module can check them without threading them through.

use serde::Serialize;

pub const JSON_ENV: &str = "SHIPTRACE_JSON";
pub const QUIET_ENV: &str = "SHIPTRACE_QUIET";

fn flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|v| v == "1")
}

pub fn is_json() -> bool {
    flag(JSON_ENV)
}

pub fn is_quiet() -> bool {
    flag(QUIET_ENV)
}

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(s) => println!("{s}"),
        Err(e) => eprintln!("  Error: failed to serialize output: {e}"),
    }
}
