//! Configuration validation

use std::collections::{HashMap, HashSet};

use super::{Config, InterfaceKindName, NamespaceConfig};
use crate::dataplane::InterfaceKind;
use crate::telemetry::is_known_level;

/// Minimum IPv4 MTU every host must accept
const MIN_MTU: usize = 576;
/// Largest IPv4 total length
const MAX_MTU: usize = u16::MAX as usize;

#[derive(Debug, Clone)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            warnings: Vec::new(),
            errors: Vec::new(),
        }
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            println!("[WARN] {}", warning);
        }
        for error in &self.errors {
            println!("[ERROR] {}", error);
        }
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::new()
    }
}

/// Validate configuration and return warnings/errors
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();

    validate_globals(config, &mut result);
    let tunnel_vnis = validate_namespaces(config, &mut result);
    validate_tunnels(config, &tunnel_vnis, &mut result);

    result
}

fn validate_globals(config: &Config, result: &mut ValidationResult) {
    if !is_known_level(&config.log.level) {
        result.error(format!("log.level: unknown level '{}'", config.log.level));
    }
    if config.control.max_message_len == 0 {
        result.error("control.max_message_len: must be positive");
    }

    let vtep = &config.vtep;
    if vtep.ip.is_unspecified() || vtep.ip.is_multicast() {
        result.error(format!("vtep.ip: {} is not a usable address", vtep.ip));
    }
    if vtep.udp_port == 0 {
        result.error("vtep.udp_port: must be non-zero");
    }
    if vtep.uplink.is_empty() {
        result.error("vtep.uplink: interface name required");
    }
    if vtep.gateway_mac.is_none() {
        result.warn("vtep.gateway_mac: not set, physical egress needs ARP entries for every next hop");
    }

    let limits = &config.limits;
    for (name, value) in [
        ("max_routes", limits.max_routes),
        ("max_rules_per_hook", limits.max_rules_per_hook),
        ("max_fdb_entries", limits.max_fdb_entries),
        ("max_members_per_tunnel", limits.max_members_per_tunnel),
        ("max_tunnels", limits.max_tunnels),
    ] {
        if value == 0 {
            result.error(format!("limits.{}: must be positive", name));
        }
    }
    if limits.mtu > MAX_MTU {
        result.error(format!("limits.mtu: {} exceeds {}", limits.mtu, MAX_MTU));
    } else if limits.mtu < MIN_MTU {
        result.warn(format!(
            "limits.mtu: {} is below {}, FTP rewrites may drop",
            limits.mtu, MIN_MTU
        ));
    }
}

/// Check every namespace, returning the VNIs that have a member interface.
fn validate_namespaces(config: &Config, result: &mut ValidationResult) -> HashSet<u32> {
    let mut ns_names = HashSet::new();
    let mut iface_owner: HashMap<&str, &str> = HashMap::new();
    let mut vnis = HashSet::new();

    for (i, ns) in config.namespaces.iter().enumerate() {
        let ctx = format!("namespace[{}] '{}'", i, ns.name);
        if ns.name.is_empty() {
            result.error(format!("namespace[{}]: name required", i));
        } else if !ns_names.insert(ns.name.as_str()) {
            result.error(format!("{}: duplicate namespace", ctx));
        }

        let mut physical = 0;
        for iface in &ns.interfaces {
            if iface.name == config.vtep.uplink {
                result.error(format!(
                    "{}: interface '{}' clashes with the VTEP uplink",
                    ctx, iface.name
                ));
            }
            if let Some(owner) = iface_owner.insert(&iface.name, &ns.name) {
                result.error(format!(
                    "{}: interface '{}' already defined in namespace '{}'",
                    ctx, iface.name, owner
                ));
            }
            match iface.to_spec().and_then(|spec| spec.validate().map(|_| spec)) {
                Ok(spec) => {
                    if let InterfaceKind::Tunnel { vni } = spec.kind {
                        vnis.insert(vni);
                    }
                }
                Err(e) => result.error(format!("{}: {}", ctx, e)),
            }
            if iface.kind == InterfaceKindName::Physical {
                physical += 1;
            } else if !iface.floating_ips.is_empty() {
                result.error(format!(
                    "{}: interface '{}' is a tunnel and cannot hold floating IPs",
                    ctx, iface.name
                ));
            }
        }
        if physical > 1 {
            result.error(format!("{}: at most one physical interface allowed", ctx));
        }
        if ns.interfaces.is_empty() {
            result.warn(format!("{}: no interfaces defined", ctx));
        }

        validate_routes(ns, &ctx, result);
        validate_rules(ns, &ctx, result);
    }
    vnis
}

fn validate_routes(ns: &NamespaceConfig, ctx: &str, result: &mut ValidationResult) {
    for (i, route) in ns.routes.iter().enumerate() {
        if route.gateway.is_none() && route.interface.is_none() {
            result.error(format!(
                "{}: route[{}] {} needs a gateway or an interface",
                ctx, i, route.destination
            ));
        }
        if let Some(ref name) = route.interface {
            if !ns.interfaces.iter().any(|iface| &iface.name == name) {
                result.error(format!(
                    "{}: route[{}]: interface '{}' not defined",
                    ctx, i, name
                ));
            }
        }
        if !route.destination.is_network() {
            result.warn(format!(
                "{}: route[{}]: destination {} has host bits set",
                ctx, i, route.destination
            ));
        }
    }
}

fn validate_rules(ns: &NamespaceConfig, ctx: &str, result: &mut ValidationResult) {
    for (i, filter) in ns.filters.iter().enumerate() {
        if let Err(e) = filter.to_spec().and_then(|spec| spec.validate()) {
            result.error(format!("{}: filter[{}]: {}", ctx, i, e));
        }
    }
    let mut nat_keys = HashSet::new();
    for (i, nat) in ns.nat.iter().enumerate() {
        if let Err(e) = nat.validate() {
            result.error(format!("{}: nat[{}]: {}", ctx, i, e));
        }
        if !nat_keys.insert((nat.hook, nat.kind, nat.original)) {
            result.error(format!(
                "{}: nat[{}]: duplicate {} rule for {}",
                ctx, i, nat.kind, nat.original
            ));
        }
    }
}

fn validate_tunnels(config: &Config, member_vnis: &HashSet<u32>, result: &mut ValidationResult) {
    let mut seen = HashSet::new();
    for tunnel in &config.tunnels {
        let ctx = format!("tunnel vni {}", tunnel.vni);
        if !seen.insert(tunnel.vni) {
            result.error(format!("{}: duplicate tunnel", ctx));
        }
        if !member_vnis.contains(&tunnel.vni) {
            result.error(format!("{}: no tunnel interface joins this VNI", ctx));
        }
        for entry in &tunnel.fdb {
            if entry.remote.ip.is_unspecified() {
                result.error(format!("{}: fdb {}: remote address required", ctx, entry.mac));
            }
        }
        if tunnel.fdb.is_empty() {
            result.warn(format!("{}: no forwarding entries", ctx));
        }
    }
}
