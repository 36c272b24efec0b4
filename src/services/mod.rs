pub mod enrich;
pub mod fetch;
pub mod perceptual;

pub use enrich::Enricher;
pub use fetch::{Fetcher, HttpFetcher};
pub use perceptual::{Fingerprint, PerceptualService};
