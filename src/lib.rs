//! Recipe Limiter - per-user sliding-window rate limiting
//!
//! This crate bounds how many recipe generation requests each user can
//! make in a rolling time window. Attempts are logged per user in a shared
//! sorted-set store (Redis in production), pruned lazily on every check.
//! When the store is unreachable the limiter fails open and logs it.

pub mod config;
pub mod error;
pub mod http;
pub mod ratelimit;
pub mod store;
