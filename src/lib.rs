//! BikeSpeed - Bluetooth LE Cycling Speed & Cadence client
//!
//! Connects to a CSC sensor, subscribes to its measurement notifications and
//! derives speed, cadence and accumulated distance from consecutive samples,
//! including across counter wraparound.

pub mod app;
pub mod metrics;
pub mod sensors;
pub mod storage;

// Re-export commonly used types
pub use app::{MonitorOptions, RideMonitor};
pub use metrics::odometer::Odometer;
pub use sensors::central::CentralCoordinator;
pub use sensors::session::SensorSession;
pub use storage::config::AppConfig;
