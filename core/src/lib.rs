pub mod config;
pub mod error;
pub mod llm;
pub mod response;
pub mod task;
pub mod workflow;
