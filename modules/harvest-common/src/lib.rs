pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, DelayRange, PageLayout};
pub use error::{HarvestError, Result};
pub use types::*;
