use async_trait::async_trait;
use cardcat_core::{RawCardRecord, SourceId};

use crate::{
    element_text, first_text, mentions_reward_rate, selector, AdapterError, FetchedPage,
    SourceAdapter,
};

/// The Points Guy comparison tables. Cell order varies between pages, so
/// every cell is scanned for reward, bonus, and valuation text.
#[derive(Debug, Clone, Copy)]
pub struct ThePointsGuyAdapter {
    max_cards: usize,
}

impl ThePointsGuyAdapter {
    pub const DEFAULT_MAX_CARDS: usize = 20;

    pub fn new(max_cards: usize) -> Self {
        Self { max_cards }
    }
}

impl Default for ThePointsGuyAdapter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CARDS)
    }
}

#[async_trait]
impl SourceAdapter for ThePointsGuyAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::ThePointsGuy
    }

    fn max_cards_per_page(&self) -> usize {
        self.max_cards
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawCardRecord>, AdapterError> {
        let document = scraper::Html::parse_document(&page.html);
        let rows = selector("tbody tr, .card-row")?;
        let name_sel = selector("td:first-child, .card-name, h3, h4")?;
        let fee_sel = selector("td:nth-child(3), .annual-fee")?;
        let rating_sel = selector(".rating, .score, td:nth-child(2)")?;
        let cell_sel = selector("td, .cell")?;

        let mut records = Vec::new();
        for row in document.select(&rows).take(self.max_cards) {
            let Some(name) = first_text(row, &name_sel) else {
                continue;
            };
            if name.chars().count() < 5 {
                continue;
            }

            let mut record = RawCardRecord::new(SourceId::ThePointsGuy, name);
            record.category = page.category.clone();
            record.annual_fee_text = first_text(row, &fee_sel).unwrap_or_default();
            record.rating_text = first_text(row, &rating_sel);

            for text in row.select(&cell_sel).map(element_text) {
                if text.is_empty() {
                    continue;
                }
                let lower = text.to_lowercase();
                if mentions_reward_rate(&text) {
                    record.reward_hints.push(text.clone());
                }
                if lower.contains("bonus") || lower.contains("welcome") {
                    record.bonus_text = text.clone();
                }
                if text.contains('¢') || lower.contains("cent") {
                    record.redemption_value_text = Some(text.clone());
                }
                record.perk_hints.push(text);
            }
            records.push(record);
        }
        Ok(records)
    }
}
