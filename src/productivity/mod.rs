pub mod aggregator;
pub mod record;

pub use aggregator::{productivity_score, update};
pub use record::{FrameReference, Presence, ProductivityRecord};
