use async_trait::async_trait;
use cardcat_core::{RawCardRecord, SourceId};
use scraper::ElementRef;

use crate::{
    element_lines, element_text, mentions_reward_rate, selector, AdapterError, FetchedPage,
    SourceAdapter,
};

/// Bankrate review pages: each card is an `h2` inside a section-like
/// container whose text lines carry the fee, rating, rewards, and perks.
#[derive(Debug, Clone, Copy)]
pub struct BankrateAdapter {
    max_cards: usize,
}

impl BankrateAdapter {
    pub const DEFAULT_MAX_CARDS: usize = 15;

    pub fn new(max_cards: usize) -> Self {
        Self { max_cards }
    }
}

impl Default for BankrateAdapter {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_CARDS)
    }
}

fn looks_like_card_heading(text: &str) -> bool {
    text.chars().count() > 5 && (text.contains('®') || text.to_lowercase().contains("card"))
}

fn is_card_container(el: &ElementRef<'_>) -> bool {
    let element = el.value();
    if matches!(element.name(), "section" | "article") {
        return true;
    }
    element
        .attr("class")
        .map(|class| class.contains("card") || class.contains("section"))
        .unwrap_or(false)
}

fn enclosing_container(heading: ElementRef<'_>) -> Option<ElementRef<'_>> {
    heading
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(is_card_container)
}

fn record_from_lines(name: String, category: &str, lines: Vec<String>) -> RawCardRecord {
    let mut record = RawCardRecord::new(SourceId::Bankrate, name);
    record.category = category.to_string();

    for line in &lines {
        let lower = line.to_lowercase();
        let has_rate = mentions_reward_rate(line);
        if record.annual_fee_text.is_empty() && lower.contains("annual fee") {
            record.annual_fee_text = line.clone();
        }
        if record.rating_text.is_none() && lower.contains("rating") {
            record.rating_text = Some(line.clone());
        }
        if has_rate {
            record.reward_hints.push(line.clone());
        }
        if lower.contains("bonus") || lower.contains("points after") || (lower.contains("earn") && !has_rate) {
            record.bonus_text = line.clone();
        }
    }
    record.perk_hints = lines;
    record
}

#[async_trait]
impl SourceAdapter for BankrateAdapter {
    fn source_id(&self) -> SourceId {
        SourceId::Bankrate
    }

    fn max_cards_per_page(&self) -> usize {
        self.max_cards
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<Vec<RawCardRecord>, AdapterError> {
        let document = scraper::Html::parse_document(&page.html);
        let headings = selector("h2")?;

        let mut records = Vec::new();
        for heading in document.select(&headings).take(self.max_cards) {
            let name = element_text(heading);
            if !looks_like_card_heading(&name) {
                continue;
            }
            let Some(container) = enclosing_container(heading) else {
                continue;
            };
            records.push(record_from_lines(name, &page.category, element_lines(container)));
        }
        Ok(records)
    }
}
