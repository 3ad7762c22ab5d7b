pub mod queue;
pub mod reader;
pub mod stats;
pub mod ticker;
pub mod writer;
