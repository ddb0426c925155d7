//! Keycleave - split-key API proxy
//!
//! Keycleave lets a client application call third-party APIs without a
//! complete API key ever existing on any single party. Keys are split at
//! registration into a server share and a client share; at call time the
//! proxy reconstructs the key transiently, injects it into the outbound
//! request, forwards it, and discards it. The reconstruction path is
//! gated by Apple DeviceCheck attestation.
//!
//! ## Components
//!
//! - **keysplit**: one-time-pad secret splitting and reconstruction
//! - **proxy**: control-header protocol, placeholder rewriting, forwarding
//! - **attest**: DeviceCheck gate run before every proxy request
//! - **db**: MongoDB store for users, projects, key shares, credentials
//! - **identity**: caller identity from the external identity provider
//! - **routes**/**server**: HTTP surface

pub mod attest;
pub mod config;
pub mod db;
pub mod identity;
pub mod keysplit;
pub mod proxy;
pub mod routes;
pub mod server;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use types::{KeycleaveError, Result};
