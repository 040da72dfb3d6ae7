//! Remote music catalog: search and track lookup.

pub mod client;
pub mod normalize;

pub use client::CatalogClient;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog base URL is not configured")]
    NotConfigured,

    #[error("invalid catalog URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("catalog returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("could not parse {0} (JSON shape not recognized)")]
    UnrecognizedShape(&'static str),
}
