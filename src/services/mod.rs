pub mod content;
pub mod handlers;
pub mod orchestrator;
pub mod processor;
