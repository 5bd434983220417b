//! Task graph, executor and daily schedule.
//!
//! - [`dag`]: validated graph of named tasks and their upstreams
//! - [`executor`]: runs a graph to a fixed point with per-task retries
//! - [`schedule`]: computes the daily UTC ticks

pub mod dag;
pub mod executor;
pub mod schedule;

pub use dag::TaskGraph;
pub use executor::{Executor, RunReport, RunState};
