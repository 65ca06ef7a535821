//! Sync Client, spec §4.H — push outbox / pull changes / cursor /
//! full-sync guard.

mod client;
mod wire;

pub use client::{Keyring, Session, SyncClient};
pub use wire::{PullResponse, PushResponse, SkippedChange, WireChange};
