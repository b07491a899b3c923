pub mod machine;
pub mod state;
pub mod tracker;

pub use machine::EyeStateMachine;
pub use state::{ClosureEvent, EyeState, EyeStateSession, RawLabel};
pub use tracker::{EyeTracker, Observation, TickReport};
