pub mod analyzer;
pub mod client;
