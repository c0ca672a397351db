pub mod attachments;
pub mod backend;
pub mod compose;
pub mod config;
pub mod connection;
pub mod credentials;
pub mod engine;
pub mod error;
pub mod folders;
pub mod log;
pub mod render;
pub mod router;
pub mod store;
pub mod submit;
pub mod window;
