//! Dataset persistence with backup-before-overwrite, plus the retrying HTTP
//! fetcher source adapters use.

pub mod dataset;
pub mod fetch;

pub use dataset::{sha256_hex, DatasetStore, PersistOutcome};
pub use fetch::{
    classify_status, classify_transport_error, BackoffPolicy, FetchConfig, FetchError,
    FetchedResponse, HttpFetcher, RetryDisposition,
};

pub const CRATE_NAME: &str = "cardcat-storage";
