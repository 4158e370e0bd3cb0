pub mod audit;
pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod scanner;
pub mod service;
pub mod store;
pub mod wal;
