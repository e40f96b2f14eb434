pub mod catalog;
pub mod dispatcher;
pub mod encryption;
pub mod inference;
pub mod jobs;
pub mod memory_store;
pub mod pipeline;
pub mod preprocess;
pub mod queue;
pub mod result_writer;
pub mod storage;
pub mod store;
