//! Notification worker.
//!
//! Consumes the dispatch queue and runs one `DispatchJobHandler` invocation
//! per message, many at a time, until asked to shut down.

pub mod worker;
