//! Sync server internals, exposed as a library so integration tests can
//! drive a server instance in-process.

pub mod auth;
pub mod db;
pub mod error;
pub mod router;
pub mod settings;
