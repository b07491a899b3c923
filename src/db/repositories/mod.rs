mod closure_logs;
mod employees;
mod frame_logs;
mod monitoring_sessions;
