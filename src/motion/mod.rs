pub mod cache;
pub mod record;
pub mod sequence;

pub use cache::MotionCache;
pub use record::{read_record, record_file_name, write_records, MotionRecord};
pub use sequence::{motion_name, MotionSequence};
