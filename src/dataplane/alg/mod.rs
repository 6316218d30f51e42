//! Application-layer gateways

pub mod ftp;

pub use ftp::{FtpMode, FTP_CONTROL_PORT};

/// Outcome of running a gateway over one packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlgVerdict {
    /// Nothing to rewrite
    Unchanged,
    /// The payload was rewritten and checksums refreshed
    Rewritten,
    /// Incomplete or unrewritable control data
    Drop,
}
