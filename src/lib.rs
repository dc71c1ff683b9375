//! vulndigest: multi-source security vulnerability aggregation service.
//!
//! Pulls advisories from NVD, CISA KEV, GitHub Advisory, OSV (PyPI and
//! Maven) and KISA, normalizes them into one record shape, deduplicates
//! across feeds, and serves them over HTTP. A streaming gateway turns the
//! aggregated data into AI-generated briefings via Claude, OpenAI or
//! Gemini.

pub mod aggregator;
pub mod config;
pub mod dates;
pub mod error;
pub mod llm;
pub mod logging;
pub mod models;
pub mod report;
pub mod routes;
pub mod sources;

pub use aggregator::Aggregator;
pub use config::Config;
pub use error::{FeedError, Result};
pub use llm::{LlmGateway, LlmProvider, LlmRequest, StreamEvent};
pub use models::{
    DateRange, ReportType, Severity, SourceTag, VulnQueryParams, VulnResponse, Vulnerability,
};
pub use sources::{FeedSource, FetchParams};
