//! Tunnel establishment seam.
//!
//! The controller never talks to a transport directly; it goes through the
//! [`Tunnel`] trait so a real backend, the [`SimulatedTunnel`], or a test
//! fake can be plugged in.

use crate::catalog::{HealthStatus, Server};
use rand::Rng;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// Establishes and tears down tunnels to a server.
///
/// Implementations are called from a worker thread and must be shareable.
pub trait Tunnel: Send + Sync {
    /// Brings up a tunnel to `server` and returns the address assigned to
    /// the client inside it.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason if the tunnel could not be brought up.
    fn establish(&self, server: &Server) -> Result<IpAddr, String>;

    /// Releases the tunnel to `server`.
    ///
    /// # Errors
    ///
    /// Returns a human readable reason if teardown reported a problem. The
    /// tunnel is considered released either way.
    fn teardown(&self, server: &Server) -> Result<(), String>;
}

/// Tunnel that only pretends to connect.
///
/// It waits for a short handshake delay, refuses servers that are not
/// online, and hands out a random public-looking IPv4 address.
#[derive(Debug, Clone)]
pub struct SimulatedTunnel {
    handshake: Duration,
}

impl SimulatedTunnel {
    pub fn new(handshake: Duration) -> Self {
        Self { handshake }
    }
}

impl Default for SimulatedTunnel {
    fn default() -> Self {
        Self::new(crate::constants::SIMULATED_HANDSHAKE)
    }
}

impl Tunnel for SimulatedTunnel {
    fn establish(&self, server: &Server) -> Result<IpAddr, String> {
        std::thread::sleep(self.handshake);
        match server.status {
            HealthStatus::Online => Ok(IpAddr::V4(random_ipv4(&mut rand::rng()))),
            status => Err(format!("server {} is {status}", server.id)),
        }
    }

    fn teardown(&self, _server: &Server) -> Result<(), String> {
        Ok(())
    }
}

/// Generates a random address, avoiding the unspecified and broadcast ones.
pub fn random_ipv4<R: Rng + ?Sized>(rng: &mut R) -> Ipv4Addr {
    loop {
        let addr = Ipv4Addr::from(rng.random::<u32>());
        if !addr.is_unspecified() && !addr.is_broadcast() {
            return addr;
        }
    }
}
