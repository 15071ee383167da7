//! Publisher-facing HTTP surface: accepts dispatch jobs and puts them on the
//! work queue consumed by `herald-notifier`.

pub mod middleware;
pub mod routes;
pub mod state;
