#![forbid(unsafe_code)]

pub mod cache;
pub mod cli;
pub mod config;
pub mod crawler;
pub mod error;
pub mod extract;
pub mod logging;
pub mod models;
pub mod pipeline;
pub mod price;
pub mod session;
pub mod store;
pub mod traits;
pub mod verify;

pub use error::{CatalogError, Result};
