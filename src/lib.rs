//! Stdio session layer for a single-session LLM chat backend.
//!
//! Any process that can spawn a child and read/write pipes can drive
//! multi-turn chat through three byte streams: newline-delimited JSON
//! requests on stdin, raw generated text framed by marker lines on stdout,
//! and one structured JSON status message per line on stderr.

pub mod config;
pub mod engine;
pub mod protocol;
pub mod session;
pub mod stream;

use std::env;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Path to the temp log file we rotate between runs. Stderr belongs to the
/// protocol, so diagnostics go to a side file instead.
pub fn log_file_path() -> PathBuf {
    env::temp_dir().join("llm_stdio.log")
}

/// Write debug messages to the temp file so we can troubleshoot without
/// polluting the protocol channels.
pub fn log_debug(msg: &str) {
    use std::fs::OpenOptions;

    let log_path = log_file_path();
    let timestamp = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();

    if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(log_path) {
        let _ = writeln!(file, "[{timestamp}] {msg}");
    }
}

/// Remove the log file if it grows past 5 MB between runs.
pub fn init_debug_log_file() {
    let log_path = log_file_path();
    if let Ok(metadata) = fs::metadata(&log_path) {
        const MAX_BYTES: u64 = 5 * 1024 * 1024;
        if metadata.len() > MAX_BYTES {
            let _ = fs::remove_file(&log_path);
        }
    }
}
