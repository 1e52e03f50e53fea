//! CLI command handlers.

use crate::catalog::{CatalogSnapshot, HealthStatus, ServerCatalog};
use crate::cli::args::{Args, Commands};
use crate::config::Config;
use crate::error::VpnError;
use crate::metrics::{MetricsSampler, RandomMetrics};
use crate::resolver::{display_address, HttpIpSource, IpResolver};
use crate::session::{SessionController, StateChange};
use crate::tunnel::SimulatedTunnel;
use crate::utils::{expand_home, format_duration, format_rate};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

/// Applies command-line overrides on top of the loaded config.
///
/// # Errors
///
/// Returns an error if the resulting config is invalid.
pub fn apply_overrides(mut config: Config, args: &Args) -> Result<Config> {
    if let Some(path) = &args.catalog {
        config.catalog = Some(expand_home(path));
    }
    if let Some(ms) = args.interval_ms {
        config.sample_interval_ms = ms;
    }
    if let Some(ms) = args.timeout_ms {
        config.connect_timeout_ms = ms;
    }
    config.validate()?;
    Ok(config)
}

/// Runs the given command, or the overview when none was given.
///
/// # Errors
///
/// Returns an error if the command failed.
pub fn handle_command(command: Option<&Commands>, config: &Config) -> Result<()> {
    let catalog = build_catalog(config)?;
    match command {
        Some(Commands::Servers { country }) => handle_servers(&catalog, country.as_deref()),
        Some(Commands::Ip) => {
            handle_ip(config);
            Ok(())
        }
        Some(Commands::Connect { country, samples }) => {
            handle_connect(&catalog, config, country, *samples)
        }
        None => {
            handle_ip(config);
            println!();
            print_countries(&catalog);
            Ok(())
        }
    }
}

/// Builds the catalog, replacing the built-in servers with the configured
/// catalog file if there is one.
fn build_catalog(config: &Config) -> Result<ServerCatalog> {
    let catalog = ServerCatalog::builtin();
    if let Some(path) = &config.catalog {
        let text = std::fs::read_to_string(path)
            .wrap_err_with(|| format!("reading catalog {}", path.display()))?;
        let snapshot = CatalogSnapshot::from_json(&text)
            .wrap_err_with(|| format!("parsing catalog {}", path.display()))?;
        if snapshot.is_empty() {
            tracing::warn!(path = %path.display(), "catalog file lists no servers");
        }
        catalog.refresh(snapshot);
    }
    Ok(catalog)
}

fn resolver(config: &Config) -> Result<IpResolver> {
    let source = HttpIpSource::new(config.ip_lookup_endpoint()?)?;
    Ok(IpResolver::new(Box::new(source)))
}

/// Prints the server list, optionally for one country.
fn handle_servers(catalog: &ServerCatalog, country: Option<&str>) -> Result<()> {
    let snapshot = catalog.snapshot();
    let groups: Vec<_> = match country {
        Some(name) => match snapshot.group(name) {
            Some(group) => vec![group],
            None => {
                eprintln!("❌ Unknown country: {name}");
                bail!("unknown country {name:?}");
            }
        },
        None => snapshot.groups().iter().collect(),
    };

    for group in groups {
        println!("{} [{}]", group.country.label, group.status());
        for server in &group.servers {
            println!("   {:<24} {:<14} {}", server.id, server.city, server.status);
        }
    }
    Ok(())
}

/// Resolves the public address once, falling back to a placeholder.
fn handle_ip(config: &Config) {
    let address = resolver(config).and_then(|r| r.resolve_public().map_err(Into::into));
    if let Err(e) = &address {
        tracing::warn!(error = %e, "public address unavailable");
    }
    println!("Real IP: {}", display_address(address.ok()));
}

fn print_countries(catalog: &ServerCatalog) {
    println!("All Servers");
    for (country, status) in catalog.countries() {
        let marker = if status == HealthStatus::Online { "●" } else { "○" };
        println!("   {marker} {:<28} {status}", country.label);
    }
}

/// Runs one connect → sample → disconnect cycle.
fn handle_connect(
    catalog: &ServerCatalog,
    config: &Config,
    country: &str,
    samples: usize,
) -> Result<()> {
    let resolver = resolver(config)?;
    let real = resolver.resolve_public().ok();
    println!("Real IP: {}", display_address(real));

    let server = match catalog.pick_random(country) {
        Ok(server) => server,
        Err(e @ VpnError::NoServersAvailable { .. }) => {
            let alternatives: Vec<String> = catalog
                .countries()
                .into_iter()
                .filter(|(_, status)| *status == HealthStatus::Online)
                .map(|(c, _)| c.name)
                .collect();
            eprintln!("❌ {e}");
            if !alternatives.is_empty() {
                eprintln!("   Try one of: {}", alternatives.join(", "));
            }
            return Err(e.into());
        }
        Err(e) => return Err(e.into()),
    };

    let sampler = MetricsSampler::new(Box::new(RandomMetrics), config.sample_interval());
    let interval = sampler.interval();
    let controller = SessionController::new(Arc::new(SimulatedTunnel::default()), sampler)
        .with_connect_timeout(config.connect_timeout());
    let changes = controller.subscribe();
    let telemetry = controller.subscribe_metrics();

    let connected = controller.connect(Arc::clone(&server));
    print_changes(&changes);
    let session = match connected {
        Ok(session) => session,
        Err(e) => {
            if e.is_user_visible() {
                eprintln!("❌ Connection failed: {e}");
            }
            return Err(e.into());
        }
    };

    let label = catalog
        .snapshot()
        .group(&server.country)
        .map_or_else(|| server.country.clone(), |g| g.country.label.clone());
    println!("✅ Connected to {} in {label}", server.city);
    println!("   Sampling every {} ms", interval.as_millis());

    let tunneled = resolver.resolve_tunnel(&server, &session);
    if controller.is_current(session.generation) {
        println!("VPN IP: {}", display_address(tunneled));
    }

    for sample in telemetry.iter().take(samples) {
        let elapsed = session
            .started_at
            .and_then(|start| sample.timestamp.duration_since(start).ok())
            .unwrap_or_default();
        println!(
            "   {}  ↓ {:<12} ↑ {:<12} ping {} ms",
            format_duration(elapsed),
            format_rate(sample.download_mbps),
            format_rate(sample.upload_mbps),
            sample.latency_ms
        );
    }

    let uptime = controller.session().uptime().unwrap_or_default();
    controller.disconnect()?;
    print_changes(&changes);
    println!(
        "Disconnected after {}. Real IP: {}",
        format_duration(uptime),
        display_address(resolver.effective_address(&controller.session()))
    );
    Ok(())
}

fn print_changes(changes: &Receiver<StateChange>) {
    for change in changes.try_iter() {
        match change.reason {
            Some(reason) => println!("   {} -> {} ({reason})", change.from, change.to),
            None => println!("   {} -> {}", change.from, change.to),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    #[test]
    fn test_apply_overrides() {
        let args = Args::parse_from([
            "veil",
            "--interval-ms",
            "200",
            "--timeout-ms",
            "900",
            "--catalog",
            "/tmp/servers.json",
        ]);
        let config = apply_overrides(Config::default(), &args).unwrap();
        assert_eq!(config.sample_interval_ms, 200);
        assert_eq!(config.connect_timeout_ms, 900);
        assert_eq!(config.catalog, Some(PathBuf::from("/tmp/servers.json")));
    }

    #[test]
    fn test_apply_overrides_rejects_zero_interval() {
        let args = Args::parse_from(["veil", "--interval-ms", "0"]);
        assert!(apply_overrides(Config::default(), &args).is_err());
    }

    #[test]
    fn test_build_catalog_from_file() {
        let path = std::env::temp_dir().join(format!("veil-catalog-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"countries":[{"name":"Europe","servers":[{"city":"Paris"}]}]}"#,
        )
        .unwrap();
        let config = Config {
            catalog: Some(path.clone()),
            ..Config::default()
        };
        let catalog = build_catalog(&config).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(catalog.snapshot().len(), 1);
        assert_eq!(catalog.pick_random("Europe").unwrap().city, "Paris");
    }

    #[test]
    fn test_build_catalog_missing_file() {
        let config = Config {
            catalog: Some(PathBuf::from("/nonexistent/veil/catalog.json")),
            ..Config::default()
        };
        assert!(build_catalog(&config).is_err());
    }

    #[test]
    fn test_connect_to_offline_country_fails() {
        let catalog = ServerCatalog::builtin();
        let config = Config {
            ip_lookup_url: "http://127.0.0.1:9/".to_string(),
            ..Config::default()
        };
        let err = handle_connect(&catalog, &config, "Africa", 1).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<VpnError>(),
            Some(VpnError::NoServersAvailable { .. })
        ));
    }

    #[test]
    fn test_servers_unknown_country_fails() {
        let catalog = ServerCatalog::builtin();
        assert!(handle_servers(&catalog, Some("Atlantis")).is_err());
        assert!(handle_servers(&catalog, Some("asia pacific")).is_ok());
        assert!(handle_servers(&catalog, None).is_ok());
    }

    #[test]
    fn test_connect_cycle_ends_idle() {
        let catalog = ServerCatalog::builtin();
        let config = Config {
            ip_lookup_url: "http://127.0.0.1:9/".to_string(),
            sample_interval_ms: 5,
            ..Config::default()
        };
        assert!(handle_connect(&catalog, &config, "Europe", 2).is_ok());
    }
}
