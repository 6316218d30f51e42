//! Control-channel request and response bodies
//!
//! Requests are JSON objects tagged by `op`, one variant per control
//! operation. Responses carry the status code, an optional error message
//! and an optional operation-specific payload.

use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;

use crate::dataplane::rules::{FilterRuleSpec, NatRuleSpec};
use crate::dataplane::tunnel::RemoteEndpoint;
use crate::dataplane::{InterfaceSpec, RouteSpec, RuleTableKind};
use crate::error::StatusCode;
use crate::protocol::{Ipv4Cidr, MacAddr};
use crate::Error;

/// Control operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    // Namespaces
    CreateNamespace {
        name: String,
    },
    DeleteNamespace {
        name: String,
    },
    ListNamespaces,
    ShowNamespace {
        name: String,
    },

    // Interfaces
    AddInterface {
        namespace: String,
        interface: InterfaceSpec,
    },
    DeleteInterface {
        namespace: String,
        name: String,
    },
    ShowInterfaces {
        namespace: String,
    },

    // Routes
    AddRoute {
        namespace: String,
        route: RouteSpec,
    },
    DeleteRoute {
        namespace: String,
        destination: Ipv4Cidr,
    },
    ShowRoutes {
        namespace: String,
    },

    // Rules
    AddFilterRule {
        namespace: String,
        rule: FilterRuleSpec,
    },
    AddNatRule {
        namespace: String,
        rule: NatRuleSpec,
    },
    DeleteFilterRule {
        namespace: String,
        rule_id: u64,
    },
    DeleteNatRule {
        namespace: String,
        rule_id: u64,
    },
    ShowRules {
        namespace: String,
        table: RuleTableKind,
    },
    FlushRules {
        namespace: String,
        table: RuleTableKind,
    },

    // Tunnel forwarding database
    AddForwardingEntry {
        vni: u32,
        mac: MacAddr,
        remote: RemoteEndpoint,
    },
    DeleteForwardingEntry {
        vni: u32,
        mac: MacAddr,
        #[serde(default)]
        remote: Option<RemoteEndpoint>,
    },
    ShowForwarding {
        vni: u32,
    },

    // Tunnel neighbors
    AddNeighborEntry {
        vni: u32,
        ip: Ipv4Addr,
        mac: MacAddr,
    },
    DeleteNeighborEntry {
        vni: u32,
        ip: Ipv4Addr,
        #[serde(default)]
        mac: Option<MacAddr>,
    },
    ShowNeighbors {
        vni: u32,
    },

    // Underlay ARP
    AddArpEntry {
        namespace: String,
        ip: Ipv4Addr,
        mac: MacAddr,
    },
    DeleteArpEntry {
        namespace: String,
        ip: Ipv4Addr,
    },
    ShowArpEntries {
        namespace: String,
    },

    // Floating IPs
    AddFloatingIp {
        namespace: String,
        interface: String,
        ip: Ipv4Addr,
    },
    DeleteFloatingIp {
        ip: Ipv4Addr,
    },
}

impl Request {
    /// True for operations that change router state.
    pub fn is_mutation(&self) -> bool {
        !matches!(
            self,
            Request::ListNamespaces
                | Request::ShowNamespace { .. }
                | Request::ShowInterfaces { .. }
                | Request::ShowRoutes { .. }
                | Request::ShowRules { .. }
                | Request::ShowForwarding { .. }
                | Request::ShowNeighbors { .. }
                | Request::ShowArpEntries { .. }
        )
    }

    /// Operation name as it appears on the wire.
    pub fn op(&self) -> &'static str {
        match self {
            Request::CreateNamespace { .. } => "create_namespace",
            Request::DeleteNamespace { .. } => "delete_namespace",
            Request::ListNamespaces => "list_namespaces",
            Request::ShowNamespace { .. } => "show_namespace",
            Request::AddInterface { .. } => "add_interface",
            Request::DeleteInterface { .. } => "delete_interface",
            Request::ShowInterfaces { .. } => "show_interfaces",
            Request::AddRoute { .. } => "add_route",
            Request::DeleteRoute { .. } => "delete_route",
            Request::ShowRoutes { .. } => "show_routes",
            Request::AddFilterRule { .. } => "add_filter_rule",
            Request::AddNatRule { .. } => "add_nat_rule",
            Request::DeleteFilterRule { .. } => "delete_filter_rule",
            Request::DeleteNatRule { .. } => "delete_nat_rule",
            Request::ShowRules { .. } => "show_rules",
            Request::FlushRules { .. } => "flush_rules",
            Request::AddForwardingEntry { .. } => "add_forwarding_entry",
            Request::DeleteForwardingEntry { .. } => "delete_forwarding_entry",
            Request::ShowForwarding { .. } => "show_forwarding",
            Request::AddNeighborEntry { .. } => "add_neighbor_entry",
            Request::DeleteNeighborEntry { .. } => "delete_neighbor_entry",
            Request::ShowNeighbors { .. } => "show_neighbors",
            Request::AddArpEntry { .. } => "add_arp_entry",
            Request::DeleteArpEntry { .. } => "delete_arp_entry",
            Request::ShowArpEntries { .. } => "show_arp_entries",
            Request::AddFloatingIp { .. } => "add_floating_ip",
            Request::DeleteFloatingIp { .. } => "delete_floating_ip",
        }
    }
}

/// Reply to one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub status: StatusCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Response {
    pub fn success() -> Self {
        Self {
            status: StatusCode::Ok,
            message: None,
            payload: None,
        }
    }

    pub fn with_payload(payload: serde_json::Value) -> Self {
        Self {
            status: StatusCode::Ok,
            message: None,
            payload: Some(payload),
        }
    }

    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: Some(message.into()),
            payload: None,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status.is_ok()
    }
}

impl From<&Error> for Response {
    fn from(err: &Error) -> Self {
        Response::error(err.status(), err.to_string())
    }
}
