//! A harness for testing concurrent maps.
//!
//! This crate checks two properties of a map under concurrent use. The first
//! is linearizability of insert-if-absent and take-and-remove on a single key,
//! checked by recording timestamped histories and searching them against a
//! sequential model. The second is whether a single map call acts as a memory
//! barrier, probed with the store-buffering litmus test.
//!
//! The harness talks to maps through [`structures::ConcurrentMap`]. A lock-free
//! [`structures::SlotMap`] and an adapter for `dashmap::DashMap` ship with it.

pub mod config;
pub mod error;
pub mod structures;
pub mod testing;

pub use crate::config::HarnessConfig;
pub use crate::error::{HarnessError, Result};
