use async_trait::async_trait;
use cardcat_core::{RawCardRecord, SourceId};

use crate::{first_text, selector, AdapterError, FetchedPage, SourceAdapter};

/// NerdWallet "best cards" tables: one `tbody tr` per card with columns
/// name, rating blurb, annual fee, rewards rate, intro offer.
#[derive(Debug, Clone, Copy)]
pub struct NerdWalletAdapter {
    max_cards: usize,
}

impl NerdWalletAdapter {
    pub const DEFAULT_MAX_CARDS: usize = 20;

    pub fn new(max_cards: usize) -> Self {
        Self { max_cards }
    }
}

impl Default for NerdWalletAdapter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CARDS)
    }
}

#[async_trait]
impl SourceAdapter for NerdWalletAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::NerdWallet
    }

    fn max_cards_per_page(&self) -> usize {
        self.max_cards
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawCardRecord>, AdapterError> {
        let document = scraper::Html::parse_document(&page.html);
        let rows = selector("tbody tr")?;
        let name_cell = selector("th:nth-child(1), td:nth-child(1)")?;
        let blurb_cell = selector("td:nth-child(2)")?;
        let fee_cell = selector("td:nth-child(3)")?;
        let rewards_cell = selector("td:nth-child(4)")?;
        let bonus_cell = selector("td:nth-child(5)")?;

        let mut records = Vec::new();
        for row in document.select(&rows).take(self.max_cards) {
            let Some(name) = first_text(row, &name_cell) else {
                continue;
            };
            if name.chars().count() < 5 {
                continue;
            }

            let mut record = RawCardRecord::new(SourceId::NerdWallet, name);
            record.category = page.category.clone();
            record.annual_fee_text = first_text(row, &fee_cell).unwrap_or_default();
            record.reward_hints.extend(first_text(row, &rewards_cell));
            record.bonus_text = first_text(row, &bonus_cell).unwrap_or_default();
            if let Some(blurb) = first_text(row, &blurb_cell) {
                if let Some((_, best_for)) = blurb.split_once("Best for ") {
                    record.perk_hints.push(format!("Best for: {best_for}"));
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}
