//! Identity grouping and field-level merge of normalized records.

use std::collections::{BTreeMap, HashMap};

use cardcat_core::normalize::strip_trademarks;
use cardcat_core::{CanonicalCard, Network, NormalizedCard, SourceId};
use serde::{Deserialize, Serialize};
use strsim::jaro_winkler;

/// `<cleaned lowercase name>_<lowercase network>`.
pub fn identity_key(name: &str, network: Network) -> String {
    let name = strip_trademarks(&name.to_lowercase())
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    format!("{name}_{}", network.as_str().to_lowercase())
}

/// One identity's record while consolidation is still folding sources in.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedCard {
    pub card: CanonicalCard,
    pub signup_bonus: Option<String>,
    pub redemption_value: Option<String>,
    pub quality_signals: BTreeMap<SourceId, String>,
    pub sources: Vec<SourceId>,
}

impl MergedCard {
    pub fn seed(record: NormalizedCard) -> Self {
        let mut quality_signals = BTreeMap::new();
        if let Some(signal) = record.quality_signal {
            quality_signals.insert(record.source, signal);
        }
        Self {
            card: record.card,
            signup_bonus: record.signup_bonus,
            redemption_value: record.redemption_value,
            quality_signals,
            sources: vec![record.source],
        }
    }

    pub fn identity_key(&self) -> String {
        identity_key(&self.card.name, self.card.network)
    }

    /// Fold a later record of the same identity into this one.
    pub fn merge(&mut self, record: NormalizedCard) {
        let NormalizedCard {
            source,
            card,
            signup_bonus,
            redemption_value,
            quality_signal,
        } = record;

        if self.card.annual_fee == 0 && card.annual_fee != 0 {
            self.card.annual_fee = card.annual_fee;
        }

        for (category, rate) in card.reward_rates {
            let slot = self.card.reward_rates.entry(category).or_insert(rate);
            if rate > *slot {
                *slot = rate;
            }
        }

        for perk in card.perks {
            if !self.card.perks.iter().any(|p| p.eq_ignore_ascii_case(&perk)) {
                self.card.perks.push(perk);
            }
        }

        if self.signup_bonus.is_none() {
            self.signup_bonus = signup_bonus;
        }
        if self.redemption_value.is_none() {
            self.redemption_value = redemption_value;
        }
        if let Some(signal) = quality_signal {
            self.quality_signals.entry(source).or_insert(signal);
        }
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
    }
}

/// Two distinct identities whose names are close enough to deserve a look.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DedupReviewItem {
    pub identity_key_a: String,
    pub identity_key_b: String,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    pub review_threshold: f64,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            review_threshold: 0.92,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CardDeduplicator {
    config: DedupConfig,
}

impl CardDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self { config }
    }

    /// One merged record per identity, in first-seen order.
    pub fn dedup(&self, records: impl IntoIterator<Item = NormalizedCard>) -> Vec<MergedCard> {
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut merged: Vec<MergedCard> = Vec::new();

        for record in records {
            let key = identity_key(&record.card.name, record.card.network);
            match index.get(&key) {
                Some(&slot) => merged[slot].merge(record),
                None => {
                    index.insert(key, merged.len());
                    merged.push(MergedCard::seed(record));
                }
            }
        }
        merged
    }

    /// Same-network pairs whose names score at or above the review threshold.
    /// Reported only; never merged.
    pub fn near_duplicates(&self, merged: &[MergedCard]) -> Vec<DedupReviewItem> {
        let names = merged
            .iter()
            .map(|m| strip_trademarks(&m.card.name.to_lowercase()))
            .collect::<Vec<_>>();

        let mut review_items = Vec::new();
        for i in 0..merged.len() {
            for j in (i + 1)..merged.len() {
                if merged[i].card.network != merged[j].card.network {
                    continue;
                }
                let score = jaro_winkler(&names[i], &names[j]);
                if score >= self.config.review_threshold {
                    review_items.push(DedupReviewItem {
                        identity_key_a: merged[i].identity_key(),
                        identity_key_b: merged[j].identity_key(),
                        confidence_score: score,
                    });
                }
            }
        }
        review_items
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardcat_core::{base_reward_rates, RewardCategory};

    fn mk_record(source: SourceId, name: &str, fee: u32) -> NormalizedCard {
        NormalizedCard::from_canonical(
            source,
            CanonicalCard {
                id: format!("test_{}", name.to_lowercase().replace(' ', "_")),
                name: name.to_string(),
                network: Network::Visa,
                annual_fee: fee,
                reward_rates: base_reward_rates(),
                perks: Vec::new(),
            },
        )
    }

    #[test]
    fn identity_key_ignores_case_glyphs_and_spacing() {
        assert_eq!(
            identity_key("Chase  Sapphire Preferred®", Network::Visa),
            "chase sapphire preferred_visa"
        );
        assert_eq!(
            identity_key("chase sapphire preferred", Network::Visa),
            identity_key("CHASE Sapphire Preferred", Network::Visa)
        );
        assert_ne!(
            identity_key("Gold Card", Network::Visa),
            identity_key("Gold Card", Network::AmericanExpress)
        );
    }

    #[test]
    fn merge_keeps_first_id_and_fills_fee_once() {
        let dedup = CardDeduplicator::default();
        let mut first = mk_record(SourceId::NerdWallet, "Freedom Flex", 0);
        first.card.id = "chase_freedom_flex".into();
        let merged = dedup.dedup(vec![
            first,
            mk_record(SourceId::ThePointsGuy, "freedom flex", 95),
            mk_record(SourceId::Bankrate, "Freedom Flex", 550),
        ]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].card.id, "chase_freedom_flex");
        assert_eq!(merged[0].card.annual_fee, 95);
        assert_eq!(
            merged[0].sources,
            vec![SourceId::NerdWallet, SourceId::ThePointsGuy, SourceId::Bankrate]
        );
    }

    #[test]
    fn perks_dedup_case_insensitively_without_cap() {
        let dedup = CardDeduplicator::default();
        let mut a = mk_record(SourceId::NerdWallet, "Venture", 95);
        a.card.perks = vec!["Airport lounge access".into(), "TSA PreCheck credit".into()];
        let mut b = mk_record(SourceId::Bankrate, "Venture", 95);
        b.card.perks = vec![
            "airport lounge ACCESS".into(),
            "Trip delay insurance".into(),
            "Rental car protection".into(),
            "Priority boarding".into(),
            "Annual travel credit".into(),
        ];
        let merged = dedup.dedup(vec![a, b]);
        assert_eq!(merged[0].card.perks.len(), 6);
        assert_eq!(merged[0].card.perks[0], "Airport lounge access");
    }

    #[test]
    fn first_seen_transient_fields_win() {
        let dedup = CardDeduplicator::default();
        let mut a = mk_record(SourceId::NerdWallet, "Venture", 95);
        a.quality_signal = Some("4.9/5".into());
        let mut b = mk_record(SourceId::ThePointsGuy, "Venture", 95);
        b.signup_bonus = Some("75,000 miles".into());
        b.redemption_value = Some("1.85 cents".into());
        b.quality_signal = Some("4.5".into());
        let mut c = mk_record(SourceId::ThePointsGuy, "Venture", 95);
        c.signup_bonus = Some("50,000 miles".into());
        c.quality_signal = Some("3.0".into());

        let merged = dedup.dedup(vec![a, b, c]).remove(0);
        assert_eq!(merged.signup_bonus.as_deref(), Some("75,000 miles"));
        assert_eq!(merged.redemption_value.as_deref(), Some("1.85 cents"));
        assert_eq!(merged.quality_signals.get(&SourceId::ThePointsGuy).map(String::as_str), Some("4.5"));
        assert_eq!(merged.quality_signals.len(), 2);
        assert_eq!(merged.sources, vec![SourceId::NerdWallet, SourceId::ThePointsGuy]);
    }

    #[test]
    fn reward_rate_merge_is_order_independent() {
        let dedup = CardDeduplicator::default();
        let mut a = mk_record(SourceId::NerdWallet, "Sapphire", 95);
        a.card.reward_rates.insert(RewardCategory::Dining, 3.0);
        a.card.reward_rates.insert(RewardCategory::Travel, 2.0);
        let mut b = mk_record(SourceId::Bankrate, "Sapphire", 95);
        b.card.reward_rates.insert(RewardCategory::Travel, 5.0);
        b.card.reward_rates.insert(RewardCategory::Groceries, 2.0);

        let ab = dedup.dedup(vec![a.clone(), b.clone()]).remove(0);
        let ba = dedup.dedup(vec![b, a]).remove(0);
        assert_eq!(ab.card.reward_rates, ba.card.reward_rates);
        assert_eq!(ab.card.reward_rates[&RewardCategory::Travel], 5.0);
        assert_eq!(ab.card.reward_rates[&RewardCategory::Dining], 3.0);
    }

    #[test]
    fn interleaving_unrelated_identities_leaves_each_merge_unchanged() {
        let dedup = CardDeduplicator::default();
        let mut venture_a = mk_record(SourceId::NerdWallet, "Venture", 0);
        venture_a.card.perks = vec!["Global Entry credit".into()];
        venture_a.signup_bonus = Some("75,000 miles".into());
        let mut venture_b = mk_record(SourceId::Bankrate, "venture", 95);
        venture_b.card.reward_rates.insert(RewardCategory::Travel, 5.0);
        venture_b.signup_bonus = Some("50,000 miles".into());
        let mut gold_a = mk_record(SourceId::ThePointsGuy, "Gold Card", 250);
        gold_a.card.reward_rates.insert(RewardCategory::Dining, 4.0);
        gold_a.quality_signal = Some("4.7".into());
        let mut gold_b = mk_record(SourceId::Bankrate, "Gold Card", 0);
        gold_b.card.perks = vec!["Dining credit".into()];

        let grouped = dedup.dedup(vec![
            venture_a.clone(),
            venture_b.clone(),
            gold_a.clone(),
            gold_b.clone(),
        ]);
        let interleaved = dedup.dedup(vec![gold_a, venture_a, gold_b, venture_b]);

        let by_key = |merged: Vec<MergedCard>| {
            merged
                .into_iter()
                .map(|m| (m.identity_key(), m))
                .collect::<BTreeMap<_, _>>()
        };
        let grouped = by_key(grouped);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped, by_key(interleaved));
        assert_eq!(grouped["venture_visa"].card.annual_fee, 95);
        assert_eq!(grouped["venture_visa"].signup_bonus.as_deref(), Some("75,000 miles"));
    }

    #[test]
    fn output_keeps_first_seen_identity_order() {
        let dedup = CardDeduplicator::default();
        let merged = dedup.dedup(vec![
            mk_record(SourceId::NerdWallet, "Beta", 0),
            mk_record(SourceId::NerdWallet, "Alpha", 0),
            mk_record(SourceId::Bankrate, "beta", 0),
        ]);
        let names = merged.iter().map(|m| m.card.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["Beta", "Alpha"]);
    }

    #[test]
    fn near_duplicates_are_reported_not_merged() {
        let dedup = CardDeduplicator::default();
        let merged = dedup.dedup(vec![
            mk_record(SourceId::NerdWallet, "Chase Sapphire Preferred Card", 95),
            mk_record(SourceId::Bankrate, "Chase Sapphire Preferred", 95),
            mk_record(SourceId::Bankrate, "Discover it Cash Back", 0),
        ]);
        assert_eq!(merged.len(), 3);

        let review = dedup.near_duplicates(&merged);
        assert_eq!(review.len(), 1);
        assert_eq!(review[0].identity_key_a, "chase sapphire preferred card_visa");
        assert_eq!(review[0].identity_key_b, "chase sapphire preferred_visa");
        assert!(review[0].confidence_score >= 0.92);
    }

    #[test]
    fn near_duplicate_review_skips_other_networks() {
        let dedup = CardDeduplicator::default();
        let mut amex = mk_record(SourceId::ThePointsGuy, "Gold Rewards Card", 250);
        amex.card.network = Network::AmericanExpress;
        let merged = dedup.dedup(vec![mk_record(SourceId::NerdWallet, "Gold Rewards Card", 0), amex]);
        assert_eq!(merged.len(), 2);
        assert!(dedup.near_duplicates(&merged).is_empty());
    }
}
