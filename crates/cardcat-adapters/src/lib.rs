//! Source adapter contract and the per-site listing parsers.
//!
//! Adapters are the only code that knows a site's page layout. They turn one
//! listing page into loosely structured [`RawCardRecord`]s; everything after
//! that is site independent.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use cardcat_core::normalize::parse_reward_rate;
use cardcat_core::{RawCardRecord, SourceId};
use cardcat_storage::{FetchError, HttpFetcher};
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Selector};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

mod bankrate;
mod nerdwallet;
mod thepointsguy;

pub use bankrate::BankrateAdapter;
pub use nerdwallet::NerdWalletAdapter;
pub use thepointsguy::ThePointsGuyAdapter;

pub const CRATE_NAME: &str = "cardcat-adapters";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdapterContext {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
}

/// One category listing page of a source, e.g. NerdWallet's travel cards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListingTarget {
    pub category: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub category: String,
    pub html: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source_id(&self) -> SourceId;

    /// Upper bound on card entries read from a single listing page.
    fn max_cards_per_page(&self) -> usize;

    async fn fetch_listing(
        &self,
        http: &HttpFetcher,
        ctx: &AdapterContext,
        target: &ListingTarget,
    ) -> Result<FetchedPage, AdapterError> {
        let resp = http
            .fetch_bytes(ctx.run_id, self.source_id(), &target.url)
            .await?;
        Ok(FetchedPage {
            url: resp.final_url,
            category: target.category.clone(),
            html: String::from_utf8_lossy(&resp.body).into_owned(),
            fetched_at: Utc::now(),
        })
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawCardRecord>, AdapterError>;
}

pub fn adapter_for_source(source: SourceId, max_cards_per_page: Option<usize>) -> Box<dyn SourceAdapter> {
    match source {
        SourceId::NerdWallet => Box::new(NerdWalletAdapter::new(
            max_cards_per_page.unwrap_or(NerdWalletAdapter::DEFAULT_MAX_CARDS),
        )),
        SourceId::ThePointsGuy => Box::new(ThePointsGuyAdapter::new(
            max_cards_per_page.unwrap_or(ThePointsGuyAdapter::DEFAULT_MAX_CARDS),
        )),
        SourceId::Bankrate => Box::new(BankrateAdapter::new(
            max_cards_per_page.unwrap_or(BankrateAdapter::DEFAULT_MAX_CARDS),
        )),
    }
}

/// Read a saved listing page from disk in place of a live fetch.
pub fn load_fixture_page(path: impl AsRef<Path>, category: &str) -> anyhow::Result<FetchedPage> {
    let path = path.as_ref();
    let html = std::fs::read_to_string(path)
        .with_context(|| format!("reading fixture page {}", path.display()))?;
    Ok(FetchedPage {
        url: format!("file://{}", path.display()),
        category: category.to_string(),
        html,
        fetched_at: Utc::now(),
    })
}

pub(crate) fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|e| AdapterError::Message(format!("bad selector {css:?}: {e}")))
}

/// Element text with whitespace runs collapsed. Non-ASCII glyphs are kept.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    el.text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Visible text split the way a rendered page breaks it: one entry per text node.
pub(crate) fn element_lines(el: ElementRef<'_>) -> Vec<String> {
    el.text()
        .map(|t| t.split_whitespace().collect::<Vec<_>>().join(" "))
        .filter(|t| !t.is_empty())
        .collect()
}

pub(crate) fn first_text(scope: ElementRef<'_>, sel: &Selector) -> Option<String> {
    scope
        .select(sel)
        .map(element_text)
        .find(|t| !t.is_empty())
}

pub(crate) fn mentions_reward_rate(text: &str) -> bool {
    parse_reward_rate(text).is_ok()
}


#[cfg(test)]
mod tests {
    use super::test_support::fixture_path;
    use super::*;

    #[test]
    fn registry_returns_adapter_per_source() {
        for source in SourceId::ALL {
            let adapter = adapter_for_source(source, Some(7));
            assert_eq!(adapter.source_id(), source);
            assert_eq!(adapter.max_cards_per_page(), 7);
        }
        assert_eq!(
            adapter_for_source(SourceId::Bankrate, None).max_cards_per_page(),
            BankrateAdapter::DEFAULT_MAX_CARDS
        );
    }

    #[test]
    fn fixture_pages_load_with_category() {
        let page = load_fixture_page(fixture_path(SourceId::NerdWallet, "travel"), "travel").unwrap();
        assert_eq!(page.category, "travel");
        assert!(page.html.contains("<table"));
        assert!(load_fixture_page("/definitely/missing.html", "x").is_err());
    }

    #[test]
    fn reward_mentions_need_a_rate_marker() {
        assert!(mentions_reward_rate("3x points on dining"));
        assert!(!mentions_reward_rate("Luxury travel perks"));
    }
}
