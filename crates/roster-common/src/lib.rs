//! Shared types for the roster service.
//!
//! This crate contains:
//! - **Auth primitives**: bearer token authority, Argon2id password hashing
//! - **Data models**: the `User` record and its change events
//! - **Protocol types**: the JSON error envelope and realtime frames
//! - **ID generation**: prefixed UUIDv7 helpers (`req_`, `con_`)

pub mod auth;
pub mod ids;
pub mod models;
pub mod protocol;
