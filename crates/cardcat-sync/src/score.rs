use std::collections::HashSet;

use cardcat_core::{max_reward_rate, CanonicalCard, RewardCategory, MAX_PERSISTED_PERKS};

use crate::dedup::MergedCard;

pub const MULTI_SOURCE_WEIGHT: f64 = 10.0;
pub const REWARD_RATE_WEIGHT: f64 = 5.0;
pub const PERK_WEIGHT: f64 = 2.0;
pub const SIGNUP_BONUS_POINTS: f64 = 5.0;
pub const NO_FEE_POINTS: f64 = 3.0;
pub const LOW_FEE_POINTS: f64 = 1.0;
pub const LOW_FEE_CEILING: u32 = 100;

fn fee_points(annual_fee: u32) -> f64 {
    match annual_fee {
        0 => NO_FEE_POINTS,
        fee if fee < LOW_FEE_CEILING => LOW_FEE_POINTS,
        _ => 0.0,
    }
}

/// Desirability of a merged card. Higher is better.
pub fn score(merged: &MergedCard) -> f64 {
    let source_points = if merged.sources.len() > 1 {
        merged.sources.len() as f64 * MULTI_SOURCE_WEIGHT
    } else {
        0.0
    };
    let bonus_points = if merged.signup_bonus.is_some() {
        SIGNUP_BONUS_POINTS
    } else {
        0.0
    };
    source_points
        + max_reward_rate(&merged.card.reward_rates) * REWARD_RATE_WEIGHT
        + merged.card.perks.len() as f64 * PERK_WEIGHT
        + bonus_points
        + fee_points(merged.card.annual_fee)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredCard {
    pub merged: MergedCard,
    pub score: f64,
}

impl ScoredCard {
    /// Drop transient fields and cap perks for persistence.
    pub fn into_canonical(self) -> CanonicalCard {
        let mut card = self.merged.card;
        card.perks.truncate(MAX_PERSISTED_PERKS);
        card.reward_rates.entry(RewardCategory::Other).or_insert(1.0);
        card
    }
}

/// Highest score first; ties keep their incoming order. At most `limit` cards,
/// and only the best-ranked card for each `id`.
pub fn rank(merged: Vec<MergedCard>, limit: usize) -> Vec<ScoredCard> {
    let mut scored = merged
        .into_iter()
        .map(|merged| ScoredCard {
            score: score(&merged),
            merged,
        })
        .collect::<Vec<_>>();
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    let mut seen_ids = HashSet::new();
    scored.retain(|s| seen_ids.insert(s.merged.card.id.clone()));
    scored.truncate(limit);
    scored
}

#[cfg(test)]
mod tests {
    use super::*;
    use cardcat_core::{base_reward_rates, Network, SourceId};

    fn mk_merged(name: &str, fee: u32) -> MergedCard {
        MergedCard {
            card: CanonicalCard {
                id: format!("unknown_{name}"),
                name: name.to_string(),
                network: Network::Visa,
                annual_fee: fee,
                reward_rates: base_reward_rates(),
                perks: Vec::new(),
            },
            signup_bonus: None,
            redemption_value: None,
            quality_signals: Default::default(),
            sources: vec![SourceId::NerdWallet],
        }
    }

    #[test]
    fn score_adds_every_component() {
        let mut card = mk_merged("sapphire", 95);
        card.sources = vec![SourceId::NerdWallet, SourceId::ThePointsGuy];
        card.card.reward_rates.insert(RewardCategory::Travel, 5.0);
        card.card.perks = vec!["a".into(), "b".into(), "c".into()];
        card.signup_bonus = Some("60,000 points".into());
        // 20 sources + 25 rate + 6 perks + 5 bonus + 1 low fee
        assert_eq!(score(&card), 57.0);
    }

    #[test]
    fn single_source_earns_no_source_points() {
        assert_eq!(score(&mk_merged("plain", 550)), 5.0);
    }

    #[test]
    fn fee_tiers() {
        assert_eq!(fee_points(0), 3.0);
        assert_eq!(fee_points(99), 1.0);
        assert_eq!(fee_points(100), 0.0);
        assert_eq!(fee_points(550), 0.0);
    }

    #[test]
    fn rank_is_descending_stable_and_bounded() {
        let cards = vec![
            mk_merged("first_tie", 550),
            mk_merged("top", 0),
            mk_merged("second_tie", 550),
            mk_merged("middle", 50),
        ];
        let ranked = rank(cards, 3);
        let names = ranked.iter().map(|s| s.merged.card.name.as_str()).collect::<Vec<_>>();
        assert_eq!(names, vec!["top", "middle", "first_tie"]);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
    }

    #[test]
    fn rank_keeps_best_card_per_id_before_capping() {
        let mut low = mk_merged("shared", 550);
        low.card.id = "citi_citi_doublecash_card".into();
        let mut high = mk_merged("shared_dash", 0);
        high.card.id = "citi_citi_doublecash_card".into();
        let ranked = rank(vec![low, high, mk_merged("other", 50)], 2);
        let ids = ranked.iter().map(|s| s.merged.card.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["citi_citi_doublecash_card", "unknown_other"]);
        assert_eq!(ranked[0].merged.card.name, "shared_dash");
    }

    #[test]
    fn canonical_form_caps_perks_and_keeps_other() {
        let mut card = mk_merged("perky", 0);
        card.card.perks = (0..8).map(|i| format!("perk {i}")).collect();
        card.card.reward_rates.clear();
        let canonical = ScoredCard { score: 0.0, merged: card }.into_canonical();
        assert_eq!(canonical.perks.len(), MAX_PERSISTED_PERKS);
        assert_eq!(canonical.perks[0], "perk 0");
        assert_eq!(canonical.reward_rates.get(&RewardCategory::Other), Some(&1.0));
    }
}
