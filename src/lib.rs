//! Tunnel routing over a user-space network stack
//!
//! Exposes a virtual network through proxy routines:
//!
//! - SOCKS5 server whose lookups and connections go through the virtual stack
//! - TCP client tunnel: local listener -> target inside the virtual network
//! - TCP server tunnel: listener inside the virtual network -> target on the host network
//!
//! Every routine shares one [`NetworkContext`]: the virtual stack, the host
//! stack and the DNS policy. Targets are resolved fresh for every connection.
//!
//! # Example
//! ```no_run
//! use std::sync::Arc;
//! use tunroute::{HostStack, NetworkContext, RoutineConfig, config::TcpClientTunnelConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = Arc::new(NetworkContext::new(Arc::new(HostStack)));
//!     let tunnel = RoutineConfig::TcpClientTunnel(TcpClientTunnelConfig {
//!         bind_address: "127.0.0.1:8080".parse()?,
//!         target: "example.org:80".to_string(),
//!     });
//!     tunnel.spawn(ctx)?.await??;
//!     Ok(())
//! }
//! ```

pub mod address;
pub mod config;
pub mod context;
pub mod error;
pub mod forward;
pub mod routine;
pub mod socks5;
pub mod stack;

// Re-export main types at crate root for convenience
pub use address::{ResolvedEndpoint, TargetAddress};
pub use context::{AddressSelector, InOrder, NetworkContext, Shuffle};
pub use error::{Result, RouteError};
pub use forward::{ForwardingSession, SessionStats, forward};
pub use routine::{Routine, RoutineConfig};
pub use stack::{BoxStream, HostStack, NetStack, StackListener};
