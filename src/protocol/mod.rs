//! Wire formats handled by the datapath

pub mod arp;
pub mod ethernet;
pub mod icmp;
pub mod ipv4;
pub mod tcp;
pub mod types;
pub mod udp;
pub mod vxlan;

pub use types::*;
