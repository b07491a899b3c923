pub mod controller;
pub mod session;

pub use controller::MonitorController;
pub use session::{MonitorSession, StatsSnapshot};
