pub mod api;
pub mod config;
pub mod error;
pub mod roles;
pub mod store_factory;
