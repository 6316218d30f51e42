//! Configuration management
//!
//! The router reads one TOML file. Startup validates it, then replays it
//! through the same `Controller` operations the control channel uses.

mod types;
mod validation;

pub use types::*;
pub use validation::{validate, ValidationResult};

use std::path::Path;
use tracing::info;

use crate::control::Controller;
use crate::{Error, Result};

/// Load configuration from a TOML file
pub fn load<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(Error::Io)?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Config> {
    toml::from_str(content).map_err(|e| Error::Config(e.to_string()))
}

/// Install every object of `config` into the controller's datapath.
///
/// Interfaces go first so tunnel devices exist before their forwarding
/// entries, and tunnel neighbors exist before routes that resolve
/// through them.
pub fn apply(config: &Config, controller: &Controller) -> Result<()> {
    let ctx = |what: String| move |e: Error| Error::Config(format!("{}: {}", what, e));

    for ns in &config.namespaces {
        controller
            .create_namespace(&ns.name)
            .map_err(ctx(format!("namespace {}", ns.name)))?;
        for iface in &ns.interfaces {
            let what = format!("namespace {} interface {}", ns.name, iface.name);
            controller
                .add_interface(&ns.name, iface.to_spec()?)
                .map_err(ctx(what.clone()))?;
            for ip in &iface.floating_ips {
                controller
                    .add_floating_ip(&ns.name, &iface.name, *ip)
                    .map_err(ctx(what.clone()))?;
            }
        }
    }

    for tunnel in &config.tunnels {
        let what = format!("tunnel vni {}", tunnel.vni);
        for entry in &tunnel.fdb {
            controller
                .add_forwarding_entry(tunnel.vni, entry.mac, entry.remote)
                .map_err(ctx(what.clone()))?;
        }
        for neighbor in &tunnel.neighbors {
            controller
                .add_neighbor_entry(tunnel.vni, neighbor.ip, neighbor.mac)
                .map_err(ctx(what.clone()))?;
        }
    }

    for ns in &config.namespaces {
        let what = format!("namespace {}", ns.name);
        for neighbor in &ns.neighbors {
            controller
                .add_arp_entry(&ns.name, neighbor.ip, neighbor.mac)
                .map_err(ctx(what.clone()))?;
        }
        for route in &ns.routes {
            controller
                .add_route(&ns.name, route)
                .map_err(ctx(format!("{} route {}", what, route.destination)))?;
        }
        for filter in &ns.filters {
            controller
                .add_filter_rule(&ns.name, filter.to_spec()?)
                .map_err(ctx(what.clone()))?;
        }
        for nat in &ns.nat {
            controller
                .add_nat_rule(&ns.name, nat.clone())
                .map_err(ctx(what.clone()))?;
        }
    }

    info!(
        namespaces = config.namespaces.len(),
        tunnels = config.tunnels.len(),
        "configuration applied"
    );
    Ok(())
}
