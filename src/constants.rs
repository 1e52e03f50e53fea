//! Application-wide constants and configuration values.
//!
//! This module defines all static configuration values used throughout Veil,
//! including timing intervals, API endpoints, file paths, and telemetry ranges.

use std::time::Duration;

// === Application Metadata ===

/// Application name used in logging and directories.
pub const APP_NAME: &str = "veil";

// === Timing Configuration ===

/// Interval between telemetry samples while a session is connected.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);
/// Maximum time a tunnel may take to come up before the attempt fails.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// Request timeout for public IP lookups.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(5);
/// Artificial handshake delay of the simulated tunnel.
pub const SIMULATED_HANDSHAKE: Duration = Duration::from_millis(300);

// === Path Configuration ===

/// Name of the configuration directory under ~/.config/
pub const CONFIG_DIR_NAME: &str = "veil";
/// Name of the configuration file inside the configuration directory.
pub const CONFIG_FILE_NAME: &str = "config.json";

// === Telemetry API Endpoints ===

/// API endpoint for public IP address lookup.
pub const IP_LOOKUP_API: &str = "https://api.ipify.org?format=json";

// === Mock Telemetry Ranges ===

/// Download throughput range in Mbit/s.
pub const DOWNLOAD_RANGE_MBPS: (f64, f64) = (50.0, 100.0);
/// Upload throughput range in Mbit/s.
pub const UPLOAD_RANGE_MBPS: (f64, f64) = (20.0, 60.0);
/// Round-trip latency range in milliseconds, both ends inclusive.
pub const PING_RANGE_MS: (u32, u32) = (10, 30);

// === UI Messages ===

/// Placeholder shown when an address could not be resolved.
pub const MSG_UNKNOWN: &str = "Unknown";
