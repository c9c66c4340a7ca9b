//! Pluggable SOCKS5 server.
//!
//! - CONNECT, with domain targets resolved through a [`handler::Resolver`]
//!   and connections opened through a [`handler::Dialer`]
//! - BIND delegated to a [`handler::BindHandler`]
//! - No Authentication, or Username/Password Authentication when credentials
//!   are configured
//! - [SOCKS5 (RFC 1928)](https://datatracker.ietf.org/doc/html/rfc1928)
//! - [Username/Password Authentication (RFC 1929)](https://datatracker.ietf.org/doc/html/rfc1929)

pub mod address;
pub mod auth;
pub mod commands;
pub mod handler;
pub mod protocol;
pub mod server;

pub use auth::UserPass;
pub use handler::{BindHandler, Dialer, NoBind, Resolver, SystemResolver};
pub use server::Socks5Server;
