//! CLI subcommands for `gg-sandbox-cli`.
//!
//! ## Usage
//!
//! ```bash
//! gg-sandbox-cli run snippet.js --package lodash   # Run through the full pipeline
//! gg-sandbox-cli scan snippet.js --json            # Scan only
//! gg-sandbox-cli health                            # Host resource check
//! gg-sandbox-cli config show                       # Effective configuration
//! ```

pub mod config_cmd;
pub mod health_cmd;
pub mod run_cmd;
pub mod scan_cmd;

pub use health_cmd::run_health;
pub use run_cmd::{parse_run_args, run_session, RunArgs};
pub use scan_cmd::run_scan;

use std::io::Read;

/// Exit codes shared by all subcommands.
pub mod exit {
    pub const SUCCESS: i32 = 0;
    /// Code ran and failed, or the host is unhealthy.
    pub const FAILURE: i32 = 1;
    pub const USAGE: i32 = 2;
    /// Code or packages rejected for safety reasons.
    pub const REJECTED: i32 = 3;
    /// Admission refused; retry later.
    pub const UNAVAILABLE: i32 = 4;
}

/// Read a source file, or stdin when `path` is `-`.
pub fn read_source(path: &str) -> std::io::Result<String> {
    if path == "-" {
        let mut code = String::new();
        std::io::stdin().read_to_string(&mut code)?;
        Ok(code)
    } else {
        std::fs::read_to_string(path)
    }
}
