pub mod access;
pub mod ai;
pub mod auth;
pub mod config;
pub mod db;
pub mod documents;
pub mod error;
pub mod jobs;
pub mod models;
pub mod routes;
pub mod schema;
pub mod state;
pub mod storage;
pub mod workers;

pub use routes::create_router;
pub use workers::{default_handlers, Worker};
