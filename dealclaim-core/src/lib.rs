// src/lib.rs

pub mod config;
pub mod crypto;
pub mod db;
pub mod http;
pub mod repositories;
pub mod services;
pub mod tasks;
pub mod test_utils;

pub use config::EngineConfig;
pub use db::Database;
pub use dealclaim_common::error::Error;
pub use dealclaim_common::models;
pub use dealclaim_common::traits;
