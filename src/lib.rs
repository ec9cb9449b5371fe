//! Rollcall - classroom attendance engine
//!
//! Presence is established by a geofence test on the reported position and,
//! optionally, a two-phase challenge/response handshake against a registered
//! public-key credential. This library exposes all modules for testing purposes.

pub mod challenge;
pub mod credentials;
pub mod engine;
pub mod entities;
pub mod errors;
pub mod geo;
pub mod guard;
pub mod repository;
pub mod settings;
pub mod storage;
pub mod types;
