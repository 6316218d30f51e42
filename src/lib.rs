//! vrouter - multi-tenant virtual router datapath
//!
//! Per-tenant namespaces own a longest-prefix-match route table, filter
//! and NAT rule tables and an underlay neighbor cache. Tenant networks
//! reach each other over VXLAN-style overlay tunnels, and an FTP
//! application-layer gateway keeps active and passive FTP working
//! through NAT.

pub mod config;
pub mod control;
pub mod dataplane;
pub mod error;
pub mod protocol;
pub mod telemetry;

pub use error::{Error, Result};
