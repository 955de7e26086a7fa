pub mod browser;
pub mod date_normalizer;
pub mod dedup;
pub mod evidence;
pub mod extractor;
pub mod filter;
pub mod harvester;
pub mod scheduler;
pub mod stats;
pub mod store;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod traits;
mod util;

pub use harvester::{HarvestSettings, Harvester};
pub use stats::{RunOutcome, RunReport};
