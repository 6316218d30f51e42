//! Data plane components
//!
//! Route lookup, rule evaluation, overlay tunnels and the hook pipeline
//! that ties them together for each packet.

pub mod alg;
pub mod datapath;
pub mod interface;
pub mod namespace;
pub mod neighbor;
pub mod pipeline;
pub mod route;
pub mod rules;
pub mod tunnel;

pub use datapath::{Datapath, Limits};
pub use interface::{ExternalAddresses, Interface, InterfaceInfo, InterfaceKind, InterfaceSpec};
pub use namespace::{Namespace, NamespaceInfo, RouteSpec, RuleList};
pub use neighbor::{NeighborCache, NeighborInfo, NeighborState};
pub use pipeline::{Transmit, Verdict};
pub use route::{Route, RouteClass, RouteTable};
pub use rules::{Hook, RuleTableKind};
pub use tunnel::{TunnelDevice, TunnelRegistry, Vtep};
