//! Server catalog.
//!
//! Holds the set of known countries and servers together with their health.
//! The catalog is an immutable [`CatalogSnapshot`] behind a lock; a refresh
//! swaps the whole snapshot, so a selection that already captured the old
//! snapshot keeps working against it.

use crate::error::{Result, VpnError};
use rand::prelude::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, PoisonError, RwLock};

/// Reachability of a single server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Accepting connections.
    #[default]
    Online,
    /// Not reachable.
    Offline,
    /// Reachable but impaired. Never picked for new sessions.
    Degraded,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Online => write!(f, "Online"),
            HealthStatus::Offline => write!(f, "Offline"),
            HealthStatus::Degraded => write!(f, "Degraded"),
        }
    }
}

/// A VPN endpoint in a given city.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Server {
    /// Stable identifier, e.g. `europe-paris`.
    pub id: String,
    /// Country (region) key the server belongs to.
    pub country: String,
    /// City the server is located in.
    pub city: String,
    /// Current health.
    pub status: HealthStatus,
}

impl Server {
    /// Creates a server, deriving its identifier from country and city.
    pub fn new(country: &str, city: &str, status: HealthStatus) -> Self {
        Self {
            id: slug(&format!("{country} {city}")),
            country: country.to_string(),
            city: city.to_string(),
            status,
        }
    }

    /// Whether the server may be picked for a new session.
    pub fn is_online(&self) -> bool {
        self.status == HealthStatus::Online
    }
}

/// A selectable country with its display label.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Country {
    /// Lookup key, e.g. `Asia`.
    pub name: String,
    /// Human readable label, e.g. `Asia Pacific`.
    pub label: String,
}

impl Country {
    fn matches(&self, query: &str) -> bool {
        self.name.eq_ignore_ascii_case(query) || self.label.eq_ignore_ascii_case(query)
    }
}

/// Servers of one country, as returned by [`ServerCatalog::list_servers`].
#[derive(Clone, Debug)]
pub struct CountryGroup {
    pub country: Country,
    pub servers: Vec<Arc<Server>>,
}

impl CountryGroup {
    /// Aggregate status: Online if any server is online, Degraded if the best
    /// server is degraded, Offline otherwise (including empty groups).
    pub fn status(&self) -> HealthStatus {
        if self.servers.iter().any(|s| s.is_online()) {
            HealthStatus::Online
        } else if self
            .servers
            .iter()
            .any(|s| s.status == HealthStatus::Degraded)
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Offline
        }
    }
}

/// Immutable view of the catalog at one point in time.
#[derive(Clone, Debug, Default)]
pub struct CatalogSnapshot {
    groups: Vec<CountryGroup>,
}

impl CatalogSnapshot {
    /// Builds a snapshot from countries and their servers. Servers whose
    /// country is not listed get a country entry labelled with its name.
    ///
    /// Country names are compared ignoring ASCII case; a repeated country
    /// keeps its first position and label and collects the servers of
    /// every entry.
    pub fn new(countries: Vec<Country>, servers: Vec<Server>) -> Self {
        let mut groups: Vec<CountryGroup> = Vec::with_capacity(countries.len());
        for country in countries {
            if groups
                .iter()
                .any(|g| g.country.name.eq_ignore_ascii_case(&country.name))
            {
                tracing::debug!(country = %country.name, "merging repeated catalog country");
                continue;
            }
            groups.push(CountryGroup {
                country,
                servers: Vec::new(),
            });
        }

        for server in servers {
            let server = Arc::new(server);
            if let Some(group) = groups
                .iter_mut()
                .find(|g| g.country.name.eq_ignore_ascii_case(&server.country))
            {
                group.servers.push(server);
            } else {
                groups.push(CountryGroup {
                    country: Country {
                        name: server.country.clone(),
                        label: server.country.clone(),
                    },
                    servers: vec![server],
                });
            }
        }

        Self { groups }
    }

    /// Parses a catalog document.
    ///
    /// ```json
    /// {"countries":[{"name":"Europe","label":"Europe",
    ///   "servers":[{"id":"eu-paris","city":"Paris","status":"online"}]}]}
    /// ```
    ///
    /// `label`, `id` and `status` are optional.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not valid catalog JSON.
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        let file: CatalogFile = serde_json::from_str(json)?;
        let mut countries = Vec::with_capacity(file.countries.len());
        let mut servers = Vec::new();

        for entry in file.countries {
            for s in entry.servers {
                let mut server = Server::new(&entry.name, &s.city, s.status);
                if let Some(id) = s.id {
                    server.id = id;
                }
                servers.push(server);
            }
            countries.push(Country {
                label: entry.label.unwrap_or_else(|| entry.name.clone()),
                name: entry.name,
            });
        }

        Ok(Self::new(countries, servers))
    }

    /// All country groups in catalog order.
    pub fn groups(&self) -> &[CountryGroup] {
        &self.groups
    }

    /// Finds the group for a country by name or label, ignoring ASCII case.
    pub fn group(&self, country: &str) -> Option<&CountryGroup> {
        self.groups.iter().find(|g| g.country.matches(country))
    }

    /// Looks up a server by identifier.
    pub fn server(&self, id: &str) -> Option<Arc<Server>> {
        self.groups
            .iter()
            .flat_map(|g| g.servers.iter())
            .find(|s| s.id == id)
            .cloned()
    }

    /// Total number of servers.
    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.servers.len()).sum()
    }

    /// Whether the snapshot contains no servers.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Deserialize)]
struct CatalogFile {
    countries: Vec<CountryEntry>,
}

#[derive(Deserialize)]
struct CountryEntry {
    name: String,
    label: Option<String>,
    #[serde(default)]
    servers: Vec<ServerEntry>,
}

#[derive(Deserialize)]
struct ServerEntry {
    id: Option<String>,
    city: String,
    #[serde(default)]
    status: HealthStatus,
}

/// Thread-safe holder of the current catalog snapshot.
#[derive(Debug, Default)]
pub struct ServerCatalog {
    current: RwLock<Arc<CatalogSnapshot>>,
}

impl ServerCatalog {
    /// Creates a catalog holding `snapshot`.
    pub fn new(snapshot: CatalogSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
        }
    }

    /// The built-in catalog: every region's cities, with Africa and the
    /// Middle East offline.
    pub fn builtin() -> Self {
        const REGIONS: [(&str, &str, HealthStatus, &[&str]); 4] = [
            (
                "America",
                "America",
                HealthStatus::Online,
                &["New York", "Los Angeles", "Chicago", "Houston", "Miami", "Tampa"],
            ),
            (
                "Europe",
                "Europe",
                HealthStatus::Online,
                &["London", "Paris", "Berlin", "Madrid", "Rome", "Milan", "Amsterdam"],
            ),
            (
                "Asia",
                "Asia Pacific",
                HealthStatus::Online,
                &["Tokyo", "Beijing", "Seoul", "Bangkok", "Singapore", "Manila"],
            ),
            (
                "Africa",
                "Africa and the Middle East",
                HealthStatus::Offline,
                &["Casablanca", "Istanbul", "Dubai", "Abu Dhabi", "Cape Town", "Cairo"],
            ),
        ];

        let mut countries = Vec::new();
        let mut servers = Vec::new();
        for (name, label, status, cities) in REGIONS {
            countries.push(Country {
                name: name.to_string(),
                label: label.to_string(),
            });
            servers.extend(cities.iter().map(|city| Server::new(name, city, status)));
        }

        Self::new(CatalogSnapshot::new(countries, servers))
    }

    /// Returns the current snapshot. Later refreshes do not affect it.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Lists all servers grouped by country.
    pub fn list_servers(&self) -> Vec<CountryGroup> {
        self.snapshot().groups().to_vec()
    }

    /// Lists countries with their aggregate status.
    pub fn countries(&self) -> Vec<(Country, HealthStatus)> {
        self.snapshot()
            .groups()
            .iter()
            .map(|g| (g.country.clone(), g.status()))
            .collect()
    }

    /// Picks a random Online server in `country`.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::NoServersAvailable`] if the country is unknown or
    /// has no Online servers.
    pub fn pick_random(&self, country: &str) -> Result<Arc<Server>> {
        self.pick_random_with(country, &mut rand::rng())
    }

    /// Like [`pick_random`](Self::pick_random) with a caller supplied RNG.
    ///
    /// # Errors
    ///
    /// Returns [`VpnError::NoServersAvailable`] if the country is unknown or
    /// has no Online servers.
    pub fn pick_random_with<R: Rng + ?Sized>(
        &self,
        country: &str,
        rng: &mut R,
    ) -> Result<Arc<Server>> {
        let snapshot = self.snapshot();
        let online: Vec<&Arc<Server>> = snapshot
            .group(country)
            .map(|g| g.servers.iter().filter(|s| s.is_online()).collect())
            .unwrap_or_default();

        online
            .choose(rng)
            .map(|&s| Arc::clone(s))
            .ok_or_else(|| VpnError::NoServersAvailable {
                country: country.to_string(),
            })
    }

    /// Atomically replaces the catalog contents.
    pub fn refresh(&self, snapshot: CatalogSnapshot) {
        let servers = snapshot.len();
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
        tracing::info!(servers, "catalog refreshed");
    }
}

fn slug(s: &str) -> String {
    s.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
