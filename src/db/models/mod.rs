pub mod closure_log;
pub mod employee;
pub mod frame_log;
pub mod monitoring_session;

pub use closure_log::ClosureLog;
pub use employee::Employee;
pub use frame_log::FrameLog;
pub use monitoring_session::{MonitoringSession, MonitoringStatus};
