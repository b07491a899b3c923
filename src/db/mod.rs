pub mod connection;
pub mod helpers;
mod migrations;
pub mod models;
mod repositories;

pub use connection::{ConnectionOptions, Database};
pub use models::{ClosureLog, Employee, FrameLog, MonitoringSession, MonitoringStatus};
