pub mod cli;
pub mod config;
pub mod content;
pub mod highlight;
pub mod journaling;
pub mod model;
pub mod remote;
pub mod repository;
pub mod search;
pub mod storage;
pub mod sync;
pub mod trends;

pub use config::{AppConfig, ConfigLoader, ConfigPaths};
