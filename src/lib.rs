pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod extract;
pub mod logging;
pub mod metrics;
pub mod password;
pub mod schema;
pub mod server;
pub mod service;
pub mod storage;
pub mod validation;
