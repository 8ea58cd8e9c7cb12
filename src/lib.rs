pub mod config;
pub mod dispatch;
pub mod error;
pub mod fetch;
pub mod settings;
pub mod utils;

pub use error::{AppError, Result};
