pub mod commands;
pub mod config;
pub mod context;
pub mod coordinator;
pub mod discovery;
pub mod errors;
pub mod models;
pub mod platform;
pub mod probe;
pub mod store;
pub mod summary;
pub mod validator;
