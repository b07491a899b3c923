pub mod store;
pub mod writer;

pub use store::{frame_path, ProductivityStore};
pub use writer::{DeliveryStats, JobReceipt, PersistJob, PersistenceWriter};
