//! roster gateway library.
//!
//! Exposes the route table, request pipeline, realtime registry and
//! configuration so integration tests can drive the gateway in-process.

pub mod api;
pub mod config;
pub mod db;
pub mod gateway;
pub mod middleware;
pub mod registry;
pub mod state;
pub mod store;
