//! Metrics module for ride totals.

pub mod odometer;

pub use odometer::{Odometer, RideSnapshot};
