pub mod config;
pub mod error;
pub mod inference;
pub mod pipeline;
pub mod routes;
pub mod upload;
