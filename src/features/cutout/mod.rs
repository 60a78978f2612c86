pub mod fetcher;
pub mod handler;
pub mod key;
pub mod postprocess;
pub mod remover;
pub mod service;
pub mod store;
pub mod types;

pub use fetcher::{Fetcher, HttpFetcher};
pub use handler::create_cutout_router;
pub use key::KeyPolicy;
pub use remover::{BackgroundRemover, RemovalOutput, build_remover};
pub use service::{CacheStatus, CutoutOutcome, CutoutService, ServiceOptions};
pub use store::DiskStore;
pub use types::{CutoutParams, CutoutRequest, RequestDefaults};
