pub mod common;
pub mod completions;
pub mod scheduler;
pub mod sync;
pub mod updates;
