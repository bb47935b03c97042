//! Gatehouse - session, identity, authorization and unit-of-work core
//!
//! This library provides the pieces an HTTP backend builds on: opaque
//! bearer sessions in a key-value store, identity verification, a shared
//! role check, and transactional units of work over SQLite.

pub mod api;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod store;
