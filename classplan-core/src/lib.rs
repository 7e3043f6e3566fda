pub mod api;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod generate;
pub mod http_client;
pub mod model;
pub mod normalizer;
pub mod planner;
pub mod providers;
pub mod sse;
pub mod store;
