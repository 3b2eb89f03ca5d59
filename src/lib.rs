pub mod commands;
pub mod config;
pub mod core;
pub mod models;
pub mod utils;

pub use crate::core::loader::ModLoader;
pub use crate::models::error::SError;
