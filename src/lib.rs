//! # Veil VPN Session Controller
//!
//! Veil manages the lifecycle of a single VPN session: it picks a server
//! from a catalog, brings a tunnel up and down through a strict state
//! machine, samples live telemetry while connected, and resolves the
//! client's real and tunneled addresses.
//!
//! ## Modules
//! - [`catalog`]: Countries, servers and their health.
//! - [`cli`]: Command-line argument parsing and command handlers.
//! - [`config`]: Runtime configuration file and overrides.
//! - [`error`]: Error taxonomy of the core.
//! - [`metrics`]: Background telemetry sampling.
//! - [`resolver`]: Public and tunneled address resolution.
//! - [`session`]: The session state machine and controller.
//! - [`tunnel`]: Tunnel establishment seam and its simulated backend.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod constants;
pub mod error;
pub mod metrics;
pub mod resolver;
pub mod session;
pub mod tunnel;
pub mod utils;

pub use catalog::{HealthStatus, Server, ServerCatalog};
pub use error::VpnError;
pub use metrics::{MetricSample, MetricsSampler};
pub use resolver::IpResolver;
pub use session::{Session, SessionController, SessionState};
