//! Defines the core data structures used in the email-harvest application.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// One unit of work handed to a worker when it claims a queue index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ScrapeRequest {
    pub url: String,
    pub index: usize,
}

/// Which extraction path produced a result.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExtractionMethod {
    /// Static fetch and markup parse.
    Fast,
    /// Headless browser render.
    Rendered,
}

/// The outcome of scraping a single URL. Exactly one is produced per request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ScrapeResult {
    /// The URL as it was submitted.
    pub url: String,
    /// Canonical lowercase addresses; set semantics, serialized sorted.
    pub emails: BTreeSet<String>,
    /// The document title, empty when unknown.
    pub page_title: String,
    /// Human-readable failure description.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub error: Option<String>,
    /// The path that produced this result, if one ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(default)]
    pub method: Option<ExtractionMethod>,
}

impl ScrapeResult {
    /// A successful extraction.
    pub(crate) fn found(
        url: &str,
        page: PageEmails,
        method: ExtractionMethod,
    ) -> Self {
        Self {
            url: url.to_string(),
            emails: page.emails,
            page_title: page.page_title,
            error: None,
            method: Some(method),
        }
    }

    /// A failed extraction: no emails, error set.
    pub(crate) fn failed(url: &str, error: impl ToString) -> Self {
        Self {
            url: url.to_string(),
            error: Some(error.to_string()),
            ..Default::default()
        }
    }
}

/// What an extraction path returns on success.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub(crate) struct PageEmails {
    pub page_title: String,
    pub emails: BTreeSet<String>,
}

/// Events delivered to the external observer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub(crate) enum BatchEvent {
    /// A completed unit of work (throttled).
    #[serde(rename_all = "camelCase")]
    Progress {
        batch_id: u64,
        result: ScrapeResult,
        index: usize,
        processed: usize,
        total: usize,
    },
    /// Terminal signal, exactly once per batch.
    #[serde(rename_all = "camelCase")]
    BatchComplete {
        batch_id: u64,
        processed: usize,
        total: usize,
        stopped: bool,
    },
}

/// Read-only view of the scheduler's queue state.
#[derive(Serialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub(crate) struct QueueSnapshot {
    pub batch_id: u64,
    pub total: usize,
    pub cursor: usize,
    pub active: bool,
    pub paused: bool,
    pub running_count: usize,
    pub processed: usize,
    pub results: HashMap<usize, ScrapeResult>,
}
