use std::time::Duration;
use thiserror::Error;

pub mod batch;
pub mod cache;
pub mod config;
pub mod entry;
pub mod extract;
pub mod geo;
pub mod http;
pub mod interest;
pub mod listing;
pub mod notify;
pub mod pipeline;
pub mod prompt;
pub mod reconcile;
pub mod schedule;
pub mod scraper;
pub mod sheet;
pub mod store;

// Re-export commonly used types
pub use config::AppConfig;
pub use entry::{DecodeError, Entry, EntryKind};
pub use geo::Coordinates;
pub use listing::{Listing, Seller};

/// The `ScoutError` enum represents the errors that can occur while scraping, classifying and
/// persisting listings.
#[derive(Error, Debug)]
pub enum ScoutError {
    /// An HTTP request could not be sent or its body could not be read.
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    /// The server answered with a non-success status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { status: u16, url: String },
    /// A listing page did not have the expected structure.
    #[error("Scraping failed: {0}")]
    ScrapeError(String),
    /// The extraction collaborator returned something unusable.
    #[error("Content extraction failed: {0}")]
    ExtractionError(String),
    /// A service rejected the configured credentials. Retrying with the same key is pointless.
    #[error("Authentication failed: {0}")]
    AuthError(String),
    /// The LLM endpoint rejected the request or answered with nothing.
    #[error("LLM processing failed: {0}")]
    LLMError(String),
    /// A location could not be turned into coordinates.
    #[error("Geocoding failed: {0}")]
    GeocodingError(String),
    /// Sending the notification failed.
    #[error("Mail delivery failed: {0}")]
    MailError(String),
    /// A persisted entry could not be decoded.
    #[error(transparent)]
    DecodeError(#[from] DecodeError),
    /// The persisted store is unreadable as a whole.
    #[error("Store {path} is unusable: {reason}")]
    StoreError { path: String, reason: String },
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("Spreadsheet error: {0}")]
    XlsxError(#[from] rust_xlsxwriter::XlsxError),
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ::config::ConfigError),
}

impl ScoutError {
    /// Errors that must abort a pass instead of degrading a single item.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ScoutError::AuthError(_))
    }
}

/// A type alias for `Result` with the `ScoutError` error type.
pub type Result<T> = std::result::Result<T, ScoutError>;

// Constants

/// The default timeout duration for HTTP requests.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
/// The default number of concurrent requests.
pub const DEFAULT_CONCURRENT_REQUESTS: usize = 5;
/// The default maximum number of retries for failed requests.
pub const DEFAULT_MAX_RETRIES: u32 = 3;
