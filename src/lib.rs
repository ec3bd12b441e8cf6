//! ipban-platform: host probing and firewall backend selection for IPBan
//!
//! This library is the platform layer of an IP-banning service. It decides
//! which remote addresses may ever be managed, learns what kind of host it is
//! running on, and picks exactly one packet-filter backend for that host.
//!
//! # Architecture
//!
//! Startup runs [`host::HostProfile::detect`] once, then hands the profile to
//! [`firewall::BackendRegistry::select_backend`]. Everything after that talks
//! to the returned [`firewall::FirewallBackend`] trait object, passing raw
//! address strings that the backend filters through [`address::normalize`].
//!
//! # Modules
//!
//! - `address`: Address eligibility, address ranges and port ranges
//! - `host`: OS family and version probing
//! - `firewall`: Backend contract, built-in backends and the registry
//! - `process`: Bounded external process execution
//! - `config`: Configuration parsing and validation
//! - `error`: Error types and handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod config;
pub mod error;
pub mod firewall;
pub mod host;
pub mod process;

// Re-export commonly used types
pub use error::{PlatformError, Result};
pub use firewall::{BackendRegistry, FirewallBackend};
pub use host::{HostFamily, HostProfile};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
