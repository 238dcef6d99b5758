//! Sidechain Bridge Access
//!
//! prost mirror of the bridge module schema plus the gRPC client that
//! queries it and ships signed relayer transactions.

pub mod client;
pub mod proto;

pub use client::{AccountCursor, ChainTip, SideBridge, SideClient, SideError};
pub use proto::SigningStatus;
