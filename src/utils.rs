//! Utility functions for formatting and path management.
//!
//! This module provides helper functions for common operations like
//! formatting throughput rates and durations, and locating the
//! configuration directory.

use std::path::PathBuf;
use std::time::Duration;

/// Formats a throughput in Mbit/s into a human-readable string.
///
/// Rates of 1000 Mbit/s and above are shown in Gbit/s.
///
/// # Example
///
/// ```ignore
/// assert_eq!(format_rate(72.4), "72.4 Mbps");
/// assert_eq!(format_rate(1500.0), "1.5 Gbps");
/// ```
pub fn format_rate(mbps: f64) -> String {
    if mbps >= 1000.0 {
        format!("{:.1} Gbps", mbps / 1000.0)
    } else {
        format!("{mbps:.1} Mbps")
    }
}

/// Formats a duration into a human-readable time string.
///
/// # Arguments
///
/// * `duration` - The duration to format
///
/// # Returns
///
/// A formatted string in the format:
/// - `Xd XXh` for durations >= 1 day
/// - `HH:MM:SS` otherwise
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs >= 86400 {
        format!("{}d {:02}h", secs / 86400, (secs % 86400) / 3600)
    } else {
        format!(
            "{:02}:{:02}:{:02}",
            secs / 3600,
            (secs % 3600) / 60,
            secs % 60
        )
    }
}

/// Returns the application configuration directory path (`~/.config/veil`).
///
/// The directory is not created.
pub fn get_app_config_dir() -> Option<PathBuf> {
    home_dir().map(|home| home.join(".config").join(crate::constants::CONFIG_DIR_NAME))
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(stripped), Some(home)) => home.join(stripped),
        _ => PathBuf::from(path),
    }
}

/// Returns the user's home directory.
///
/// Uses the HOME environment variable on Unix systems.
pub fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
