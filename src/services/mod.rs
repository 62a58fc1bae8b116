pub mod file_processor;
pub mod metadata_store;
pub mod naming;
pub mod object_store;
pub mod pipeline;
