pub mod client;
pub mod error;
pub mod extract;
pub mod normalize;
pub mod types;

pub use client::{ScrapeClient, ScrapeConfig};
pub use error::{ScrapeFailure, ScrapeStage};
pub use types::{AccessToken, SearchParameters, SearchResult};
