//! Core card catalog model shared by adapters, consolidation, and persistence.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

pub mod normalize;

pub use normalize::{normalize, ParseDefault};

pub const CRATE_NAME: &str = "cardcat-core";

/// Dataset length cap when none is configured.
pub const DEFAULT_MAX_CARDS: usize = 100;
pub const MAX_PERSISTED_PERKS: usize = 5;

/// Third-party rate-comparison site a record was scraped from.
///
/// Declaration order is the canonical source-arrival order used when
/// consolidating: first-seen fields favour earlier sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceId {
    NerdWallet,
    ThePointsGuy,
    Bankrate,
}

impl SourceId {
    pub const ALL: [SourceId; 3] = [SourceId::NerdWallet, SourceId::ThePointsGuy, SourceId::Bankrate];

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::NerdWallet => "nerdwallet",
            SourceId::ThePointsGuy => "thepointsguy",
            SourceId::Bankrate => "bankrate",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::NerdWallet => "NerdWallet",
            SourceId::ThePointsGuy => "The Points Guy",
            SourceId::Bankrate => "Bankrate",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        let slug = input
            .trim()
            .to_ascii_lowercase()
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect::<String>();
        match slug.as_str() {
            "nerdwallet" => Some(SourceId::NerdWallet),
            "thepointsguy" | "tpg" => Some(SourceId::ThePointsGuy),
            "bankrate" => Some(SourceId::Bankrate),
            _ => None,
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payment network. Anything unrecognised is treated as Visa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Network {
    #[default]
    Visa,
    Mastercard,
    #[serde(rename = "American Express")]
    AmericanExpress,
    Discover,
}

impl Network {
    pub fn as_str(&self) -> &'static str {
        match self {
            Network::Visa => "Visa",
            Network::Mastercard => "Mastercard",
            Network::AmericanExpress => "American Express",
            Network::Discover => "Discover",
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Spending category a reward multiplier applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RewardCategory {
    Groceries,
    Dining,
    Travel,
    Gas,
    Hotels,
    Other,
}

pub type RewardRates = BTreeMap<RewardCategory, f64>;

/// Baseline rate map every card starts from: `other: 1`.
pub fn base_reward_rates() -> RewardRates {
    BTreeMap::from([(RewardCategory::Other, 1.0)])
}

/// Highest multiplier across all categories, never below 1.
pub fn max_reward_rate(rates: &RewardRates) -> f64 {
    rates.values().copied().fold(1.0, f64::max)
}

/// Loosely-structured record produced by a source adapter for one card row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCardRecord {
    pub name: String,
    /// Network text seen near the row, if any. Not used for inference.
    #[serde(default)]
    pub network_hint: String,
    #[serde(default)]
    pub annual_fee_text: String,
    #[serde(default)]
    pub reward_hints: Vec<String>,
    #[serde(default)]
    pub perk_hints: Vec<String>,
    #[serde(default)]
    pub bonus_text: String,
    pub source: SourceId,
    #[serde(default)]
    pub category: String,
    /// Third-party rating or score text (ThePointsGuy rating, Bankrate score).
    #[serde(default)]
    pub rating_text: Option<String>,
    /// Point valuation blurb, e.g. "2.05 cents per point".
    #[serde(default)]
    pub redemption_value_text: Option<String>,
}

impl RawCardRecord {
    pub fn new(source: SourceId, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            network_hint: String::new(),
            annual_fee_text: String::new(),
            reward_hints: Vec::new(),
            perk_hints: Vec::new(),
            bonus_text: String::new(),
            source,
            category: String::new(),
            rating_text: None,
            redemption_value_text: None,
        }
    }
}

/// Persisted catalog entry. Serializes to exactly the dataset fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalCard {
    pub id: String,
    pub name: String,
    pub network: Network,
    pub annual_fee: u32,
    pub reward_rates: RewardRates,
    pub perks: Vec<String>,
}

/// A single source's record after normalization, still carrying the
/// transient fields consolidation needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCard {
    pub source: SourceId,
    pub card: CanonicalCard,
    pub signup_bonus: Option<String>,
    pub redemption_value: Option<String>,
    pub quality_signal: Option<String>,
}

impl NormalizedCard {
    /// Re-enter an already canonical card into consolidation as if `source` produced it.
    pub fn from_canonical(source: SourceId, card: CanonicalCard) -> Self {
        Self {
            source,
            card,
            signup_bonus: None,
            redemption_value: None,
            quality_signal: None,
        }
    }
}
