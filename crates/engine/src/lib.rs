//! Notification dispatch engine.
//!
//! Resolves (or lazily creates) a one-to-one conversation per user on the
//! messaging gateway, posts card payloads into it under a bounded
//! retry-on-throttle discipline, and fans broadcast jobs out into per-user
//! jobs on the work queue.

pub mod directory;
pub mod dispatcher;
pub mod error;
pub mod fanout;
pub mod gateway;
pub mod handler;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;
