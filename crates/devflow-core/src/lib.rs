//! OAuth device-flow login that ends in an account-scoped personal access token.
//!
//! [`auth::DeviceFlowManager`] runs the whole exchange: tenant discovery,
//! device-code issuance, polling while the user verifies, and minting a
//! session token for the verified identity.

pub mod auth;
pub mod config;
pub mod service;
