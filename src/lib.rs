pub mod config;
pub mod daemon;
pub mod engine;
pub mod errors;
pub mod extract;
pub mod llm;
pub mod notify;
pub mod retry;
pub mod source;
pub mod store;
pub mod tracker;
pub mod watch;
