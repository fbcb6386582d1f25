//! Record normalization: free-text adapter output into the canonical card shape.
//!
//! Every parser here is a pure `&str -> Result<T, ParseDefault>` function.
//! Parse failures are expected on scraped text, so [`normalize`] never fails:
//! it substitutes the documented default for each `Err`.

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

use crate::{
    base_reward_rates, CanonicalCard, Network, NormalizedCard, RawCardRecord, RewardCategory,
    RewardRates,
};

pub const DEFAULT_ANNUAL_FEE: u32 = 0;
pub const DEFAULT_REWARD_RATE: f64 = 1.0;
pub const UNKNOWN_ISSUER: &str = "Unknown";
pub const MAX_ID_NAME_LEN: usize = 50;
pub const MAX_ID_ISSUER_LEN: usize = 10;
pub const MAX_PERKS_PER_RECORD: usize = 4;

pub const KNOWN_ISSUERS: [&str; 8] = [
    "Chase",
    "American Express",
    "Capital One",
    "Citi",
    "Bank of America",
    "Wells Fargo",
    "Discover",
    "Barclays",
];

const TRADEMARK_GLYPHS: [char; 3] = ['®', '™', '©'];

const CATEGORY_KEYWORDS: [(RewardCategory, &[&str]); 5] = [
    (RewardCategory::Dining, &["dining", "restaurant", "food"]),
    (RewardCategory::Groceries, &["grocery", "groceries", "supermarket"]),
    (RewardCategory::Travel, &["travel", "flight", "airfare", "airline"]),
    (RewardCategory::Gas, &["gas", "fuel"]),
    (RewardCategory::Hotels, &["hotel", "lodging", "accommodation"]),
];

const PERK_KEYWORDS: [&str; 9] = [
    "credit",
    "access",
    "protection",
    "insurance",
    "lounge",
    "tsa",
    "priority",
    "waived",
    "no foreign transaction",
];

static REWARD_RATE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+(?:\.\d+)?)[xX%]").expect("valid reward rate regex"));

/// Why a parser fell back to its default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ParseDefault {
    #[error("input text is empty")]
    Empty,
    #[error("no digits in input text")]
    NoDigits,
    #[error("no number followed by a rate marker (x or %)")]
    NoRateMarker,
    #[error("number does not fit the target type")]
    OutOfRange,
    #[error("no known network mentioned")]
    UnknownNetwork,
}

/// Collapse whitespace to single spaces and drop anything outside printable ASCII.
pub fn clean_text(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_whitespace() { ' ' } else { c })
        .filter(|c| (' '..='~').contains(c))
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn strip_trademarks(text: &str) -> String {
    text.chars().filter(|c| !TRADEMARK_GLYPHS.contains(c)).collect()
}

pub fn detect_issuer(name: &str) -> Option<&'static str> {
    let lower = name.to_lowercase();
    KNOWN_ISSUERS
        .iter()
        .copied()
        .find(|issuer| lower.contains(&issuer.to_lowercase()))
}

/// Stable identifier: `<issuer>_<cleaned name>`.
pub fn card_id(name: &str, issuer: &str) -> String {
    let stripped = strip_trademarks(&name.to_lowercase())
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect::<String>();
    let clean_name = stripped
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .take(MAX_ID_NAME_LEN)
        .collect::<String>();
    let clean_issuer = issuer
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_ID_ISSUER_LEN)
        .collect::<String>();
    format!("{clean_issuer}_{clean_name}")
}

pub fn parse_network(text: &str) -> Result<Network, ParseDefault> {
    let lower = text.to_lowercase();
    if lower.contains("american express") || lower.contains("amex") {
        Ok(Network::AmericanExpress)
    } else if lower.contains("mastercard") {
        Ok(Network::Mastercard)
    } else if lower.contains("discover") {
        Ok(Network::Discover)
    } else if lower.contains("visa") {
        Ok(Network::Visa)
    } else {
        Err(ParseDefault::UnknownNetwork)
    }
}

/// Network named in the card name; Visa when it names none. Adapter hints are
/// not consulted.
pub fn infer_network(name: &str) -> Network {
    parse_network(name).unwrap_or_default()
}

pub fn parse_annual_fee(text: &str) -> Result<u32, ParseDefault> {
    if text.trim().is_empty() {
        return Err(ParseDefault::Empty);
    }
    if text.to_lowercase().contains("no annual fee") || text.contains("$0") {
        return Ok(0);
    }
    let digits = text.chars().filter(char::is_ascii_digit).collect::<String>();
    if digits.is_empty() {
        return Err(ParseDefault::NoDigits);
    }
    digits.parse().map_err(|_| ParseDefault::OutOfRange)
}

/// First number immediately followed by `x` or `%`.
pub fn parse_reward_rate(text: &str) -> Result<f64, ParseDefault> {
    let caps = REWARD_RATE_RE
        .captures(text)
        .ok_or(ParseDefault::NoRateMarker)?;
    caps[1].parse().map_err(|_| ParseDefault::OutOfRange)
}

pub fn categorize_reward(text: &str) -> RewardCategory {
    let lower = text.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| lower.contains(k)))
        .map(|(category, _)| *category)
        .unwrap_or(RewardCategory::Other)
}

/// Fold reward mentions into a rate map, keeping the highest rate per category.
pub fn parse_reward_rates<S: AsRef<str>>(hints: &[S]) -> RewardRates {
    let mut rates = base_reward_rates();
    for hint in hints.iter().map(AsRef::as_ref) {
        if hint.trim().is_empty() {
            continue;
        }
        let rate = parse_reward_rate(hint)
            .unwrap_or(DEFAULT_REWARD_RATE)
            .max(DEFAULT_REWARD_RATE);
        let slot = rates.entry(categorize_reward(hint)).or_insert(rate);
        if rate > *slot {
            *slot = rate;
        }
    }
    rates
}

/// Keep benefit-looking lines of reasonable length, capped per record.
pub fn extract_perks<S: AsRef<str>>(hints: &[S]) -> Vec<String> {
    let mut perks: Vec<String> = Vec::new();
    for line in hints.iter().flat_map(|h| h.as_ref().lines()) {
        let line = line.trim();
        let len = line.chars().count();
        if len <= 15 || len >= 150 {
            continue;
        }
        let lower = line.to_lowercase();
        if !PERK_KEYWORDS.iter().any(|k| lower.contains(k)) {
            continue;
        }
        let cleaned = clean_text(line);
        if cleaned.is_empty() || perks.iter().any(|p| p.eq_ignore_ascii_case(&cleaned)) {
            continue;
        }
        perks.push(cleaned);
        if perks.len() == MAX_PERKS_PER_RECORD {
            break;
        }
    }
    perks
}

fn non_empty(text: String) -> Option<String> {
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

pub fn normalize(raw: &RawCardRecord) -> NormalizedCard {
    let issuer = detect_issuer(&raw.name).unwrap_or(UNKNOWN_ISSUER);
    let card = CanonicalCard {
        id: card_id(raw.name.trim(), issuer),
        name: clean_text(&raw.name),
        network: infer_network(&raw.name),
        annual_fee: parse_annual_fee(&raw.annual_fee_text).unwrap_or(DEFAULT_ANNUAL_FEE),
        reward_rates: parse_reward_rates(&raw.reward_hints),
        perks: extract_perks(&raw.perk_hints),
    };
    NormalizedCard {
        source: raw.source,
        card,
        signup_bonus: non_empty(clean_text(&raw.bonus_text)),
        redemption_value: raw
            .redemption_value_text
            .as_deref()
            .map(clean_text)
            .and_then(non_empty),
        quality_signal: raw.rating_text.as_deref().map(clean_text).and_then(non_empty),
    }
}
