pub mod config;
pub mod fal;
pub mod jobs;
pub mod mcp_server;
pub mod tools;
