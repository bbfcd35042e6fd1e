use std::collections::HashSet;

use rand::Rng;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Framing category of a feedback message, drawn per feedback event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum RewardTier {
    Standard,
    BonusInsight,
    PatternBreakthrough,
}

impl RewardTier {
    pub const ALL: [RewardTier; 3] = [
        RewardTier::Standard,
        RewardTier::BonusInsight,
        RewardTier::PatternBreakthrough,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RewardTier::Standard => "standard",
            RewardTier::BonusInsight => "bonus_insight",
            RewardTier::PatternBreakthrough => "pattern_breakthrough",
        }
    }

    pub fn icon(self) -> &'static str {
        match self {
            RewardTier::Standard => "✅",
            RewardTier::BonusInsight => "💡",
            RewardTier::PatternBreakthrough => "🔓",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "standard" => Some(RewardTier::Standard),
            "bonus_insight" => Some(RewardTier::BonusInsight),
            "pattern_breakthrough" => Some(RewardTier::PatternBreakthrough),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RewardError {
    #[error("invalid reward configuration: {0}")]
    InvalidConfiguration(String),
}

/// Declared base weights. Weights need not sum to 1.0; they are normalized
/// before every draw.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardTable {
    entries: Vec<(RewardTier, f64)>,
}

impl RewardTable {
    pub fn new(entries: Vec<(RewardTier, f64)>) -> Result<Self, RewardError> {
        if entries.is_empty() {
            return Err(RewardError::InvalidConfiguration(
                "reward table must contain at least one tier".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (tier, weight) in &entries {
            if !seen.insert(*tier) {
                return Err(RewardError::InvalidConfiguration(format!(
                    "tier '{}' is listed more than once",
                    tier.as_str()
                )));
            }
            if !weight.is_finite() || *weight < 0.0 {
                return Err(RewardError::InvalidConfiguration(format!(
                    "tier '{}' has invalid weight {weight}",
                    tier.as_str()
                )));
            }
        }

        let total: f64 = entries.iter().map(|(_, w)| w).sum();
        if total <= 0.0 {
            return Err(RewardError::InvalidConfiguration(
                "reward weights sum to zero".to_string(),
            ));
        }

        Ok(Self { entries })
    }

    /// Parse `tier=weight` pairs separated by commas, e.g.
    /// `standard=0.7,bonus_insight=0.2,pattern_breakthrough=0.1`.
    pub fn parse(weights: &str) -> Result<Self, RewardError> {
        let mut entries = Vec::new();
        for part in weights.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, weight) = part.split_once('=').ok_or_else(|| {
                RewardError::InvalidConfiguration(format!(
                    "expected 'tier=weight', got '{part}'"
                ))
            })?;
            let tier = RewardTier::parse(name).ok_or_else(|| {
                RewardError::InvalidConfiguration(format!("unknown reward tier '{}'", name.trim()))
            })?;
            let weight: f64 = weight.trim().parse().map_err(|_| {
                RewardError::InvalidConfiguration(format!(
                    "weight for '{}' is not a number: '{}'",
                    tier.as_str(),
                    weight.trim()
                ))
            })?;
            entries.push((tier, weight));
        }
        Self::new(entries)
    }

    pub fn entries(&self) -> &[(RewardTier, f64)] {
        &self.entries
    }

    pub fn weight(&self, tier: RewardTier) -> f64 {
        self.entries
            .iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, w)| *w)
            .unwrap_or(0.0)
    }
}

impl Default for RewardTable {
    fn default() -> Self {
        Self {
            entries: vec![
                (RewardTier::Standard, 0.70),
                (RewardTier::BonusInsight, 0.20),
                (RewardTier::PatternBreakthrough, 0.10),
            ],
        }
    }
}

/// Thresholds and boost sizes for history-based weight adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct RewardConfig {
    pub breakthrough_after_days: u32,
    pub breakthrough_boost_per_day: f64,
    pub breakthrough_boost_cap: f64,
    pub streak_threshold: u32,
    pub streak_bonus_boost: f64,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            breakthrough_after_days: 7,
            breakthrough_boost_per_day: 0.02,
            breakthrough_boost_cap: 0.20,
            streak_threshold: 3,
            streak_bonus_boost: 0.10,
        }
    }
}

/// Recent user history feeding the weight adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RewardSignals {
    /// Days since the last pattern breakthrough; `None` if there never was one.
    pub days_since_breakthrough: Option<u32>,
    pub streak_days: u32,
    pub has_pattern_data: bool,
}

/// Outcome of one draw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RewardRoll {
    pub tier: RewardTier,
    /// Effective probability of the selected tier at draw time.
    pub probability: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RewardRoller {
    table: RewardTable,
    config: RewardConfig,
}

impl RewardRoller {
    pub fn new(table: RewardTable, config: RewardConfig) -> Self {
        Self { table, config }
    }

    pub fn table(&self) -> &RewardTable {
        &self.table
    }

    fn breakthrough_boost(&self, days_since_breakthrough: Option<u32>) -> f64 {
        let cap = self.config.breakthrough_boost_cap;
        match days_since_breakthrough {
            None => cap,
            Some(days) if days > self.config.breakthrough_after_days => {
                let overdue = f64::from(days - self.config.breakthrough_after_days);
                (overdue * self.config.breakthrough_boost_per_day).min(cap)
            }
            Some(_) => 0.0,
        }
    }

    /// Normalized per-tier probabilities after applying `signals`.
    pub fn probabilities(
        &self,
        signals: Option<&RewardSignals>,
    ) -> Result<Vec<(RewardTier, f64)>, RewardError> {
        // Boosts are absolute probabilities, so they apply on the unit scale.
        let base_total: f64 = self.table.entries().iter().map(|(_, w)| w).sum();
        let mut weights: Vec<(RewardTier, f64)> = self
            .table
            .entries()
            .iter()
            .map(|&(tier, weight)| (tier, weight / base_total))
            .collect();

        if let Some(signals) = signals {
            let breakthrough_boost = self.breakthrough_boost(signals.days_since_breakthrough);
            let streak_boost = if signals.streak_days >= self.config.streak_threshold {
                self.config.streak_bonus_boost
            } else {
                0.0
            };

            for (tier, weight) in &mut weights {
                match tier {
                    RewardTier::PatternBreakthrough if !signals.has_pattern_data => *weight = 0.0,
                    RewardTier::PatternBreakthrough => *weight += breakthrough_boost,
                    RewardTier::BonusInsight => *weight += streak_boost,
                    RewardTier::Standard => {}
                }
            }
        }

        let total: f64 = weights.iter().map(|(_, w)| w).sum();
        if !(total > 0.0) {
            return Err(RewardError::InvalidConfiguration(
                "adjusted reward weights sum to zero".to_string(),
            ));
        }

        Ok(weights
            .into_iter()
            .map(|(tier, weight)| (tier, weight / total))
            .collect())
    }

    pub fn probability_of(
        &self,
        tier: RewardTier,
        signals: Option<&RewardSignals>,
    ) -> Result<f64, RewardError> {
        Ok(self
            .probabilities(signals)?
            .into_iter()
            .find(|(t, _)| *t == tier)
            .map(|(_, p)| p)
            .unwrap_or(0.0))
    }

    pub fn roll<R: Rng + ?Sized>(
        &self,
        signals: Option<&RewardSignals>,
        rng: &mut R,
    ) -> Result<RewardRoll, RewardError> {
        let probabilities = self.probabilities(signals)?;
        let draw: f64 = rng.gen_range(0.0..1.0);
        Ok(select_tier(&probabilities, draw))
    }
}

/// Walk the cumulative distribution. Floating-point remainder falls to the
/// last tier with non-zero probability.
fn select_tier(probabilities: &[(RewardTier, f64)], draw: f64) -> RewardRoll {
    let mut cumulative = 0.0;
    let mut last_nonzero = None;
    for &(tier, probability) in probabilities {
        if probability <= 0.0 {
            continue;
        }
        cumulative += probability;
        last_nonzero = Some((tier, probability));
        if draw < cumulative {
            return RewardRoll { tier, probability };
        }
    }

    let (tier, probability) = last_nonzero.unwrap_or(probabilities[0]);
    RewardRoll { tier, probability }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn frequencies(roller: &RewardRoller, signals: Option<&RewardSignals>, n: usize) -> Vec<(RewardTier, f64)> {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let mut counts = [0usize; 3];
        for _ in 0..n {
            let roll = roller.roll(signals, &mut rng).expect("valid table");
            let idx = RewardTier::ALL.iter().position(|t| *t == roll.tier).unwrap();
            counts[idx] += 1;
        }
        RewardTier::ALL
            .iter()
            .zip(counts)
            .map(|(tier, c)| (*tier, c as f64 / n as f64))
            .collect()
    }

    #[test]
    fn rolls_match_declared_weights_without_signals() {
        let roller = RewardRoller::default();
        for (tier, observed) in frequencies(&roller, None, 10_000) {
            let expected = roller.table().weight(tier);
            assert!(
                (observed - expected).abs() < 0.02,
                "{} observed {observed} expected {expected}",
                tier.as_str()
            );
        }
    }

    #[test]
    fn unnormalized_weights_are_normalized() {
        let table = RewardTable::new(vec![
            (RewardTier::Standard, 3.0),
            (RewardTier::BonusInsight, 1.0),
        ])
        .unwrap();
        let roller = RewardRoller::new(table, RewardConfig::default());
        let probs = roller.probabilities(None).unwrap();
        assert_eq!(probs, vec![(RewardTier::Standard, 0.75), (RewardTier::BonusInsight, 0.25)]);

        for (tier, observed) in frequencies(&roller, None, 10_000) {
            let expected = roller.probability_of(tier, None).unwrap();
            assert!((observed - expected).abs() < 0.02);
        }
    }

    #[test]
    fn breakthrough_probability_never_decreases_with_days() {
        let roller = RewardRoller::default();
        let mut previous = 0.0;
        for days in 0..60 {
            let signals = RewardSignals {
                days_since_breakthrough: Some(days),
                streak_days: 0,
                has_pattern_data: true,
            };
            let p = roller
                .probability_of(RewardTier::PatternBreakthrough, Some(&signals))
                .unwrap();
            assert!(p >= previous, "day {days}: {p} < {previous}");
            previous = p;
        }

        let never = RewardSignals {
            days_since_breakthrough: None,
            streak_days: 0,
            has_pattern_data: true,
        };
        let p_never = roller
            .probability_of(RewardTier::PatternBreakthrough, Some(&never))
            .unwrap();
        assert!(p_never >= previous);
    }

    #[test]
    fn insufficient_pattern_data_zeroes_breakthrough() {
        let roller = RewardRoller::default();
        let signals = RewardSignals {
            days_since_breakthrough: None,
            streak_days: 10,
            has_pattern_data: false,
        };
        let p = roller
            .probability_of(RewardTier::PatternBreakthrough, Some(&signals))
            .unwrap();
        assert_eq!(p, 0.0);

        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2_000 {
            let roll = roller.roll(Some(&signals), &mut rng).unwrap();
            assert_ne!(roll.tier, RewardTier::PatternBreakthrough);
        }
    }

    #[test]
    fn streak_boosts_bonus_tier() {
        let roller = RewardRoller::default();
        let short = RewardSignals {
            days_since_breakthrough: Some(0),
            streak_days: 2,
            has_pattern_data: true,
        };
        let long = RewardSignals {
            streak_days: 5,
            ..short
        };
        let p_short = roller.probability_of(RewardTier::BonusInsight, Some(&short)).unwrap();
        let p_long = roller.probability_of(RewardTier::BonusInsight, Some(&long)).unwrap();
        assert!(p_long > p_short);
    }

    #[test]
    fn breakthrough_boost_is_capped() {
        let roller = RewardRoller::default();
        let far = RewardSignals {
            days_since_breakthrough: Some(365),
            streak_days: 0,
            has_pattern_data: true,
        };
        let p = roller
            .probability_of(RewardTier::PatternBreakthrough, Some(&far))
            .unwrap();
        // 0.10 + 0.20 cap over a total of 1.20
        assert!((p - 0.25).abs() < 1e-9);
    }

    #[test]
    fn boosts_do_not_depend_on_table_scale() {
        let unit = RewardRoller::default();
        let scaled = RewardRoller::new(
            RewardTable::parse("standard=70,bonus_insight=20,pattern_breakthrough=10").unwrap(),
            RewardConfig::default(),
        );
        let signals = RewardSignals {
            days_since_breakthrough: None,
            streak_days: 5,
            has_pattern_data: true,
        };
        let a = unit.probabilities(Some(&signals)).unwrap();
        let b = scaled.probabilities(Some(&signals)).unwrap();
        for ((tier_a, p_a), (tier_b, p_b)) in a.iter().zip(&b) {
            assert_eq!(tier_a, tier_b);
            assert!((p_a - p_b).abs() < 1e-9, "{tier_a:?}: {p_a} vs {p_b}");
        }
        // 0.10 + 0.20 over a total of 1.30
        let breakthrough = scaled
            .probability_of(RewardTier::PatternBreakthrough, Some(&signals))
            .unwrap();
        assert!((breakthrough - 0.3 / 1.3).abs() < 1e-9);
    }

    #[test]
    fn roll_reports_probability_used() {
        let roller = RewardRoller::default();
        let mut rng = StdRng::seed_from_u64(1);
        let roll = roller.roll(None, &mut rng).unwrap();
        let expected = roller.probability_of(roll.tier, None).unwrap();
        assert!((roll.probability - expected).abs() < 1e-12);
    }

    #[test]
    fn degenerate_tables_are_rejected() {
        assert!(matches!(
            RewardTable::new(Vec::new()),
            Err(RewardError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            RewardTable::new(vec![(RewardTier::Standard, 0.0), (RewardTier::BonusInsight, 0.0)]),
            Err(RewardError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            RewardTable::new(vec![(RewardTier::Standard, -1.0)]),
            Err(RewardError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            RewardTable::new(vec![(RewardTier::Standard, 0.5), (RewardTier::Standard, 0.5)]),
            Err(RewardError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn breakthrough_only_table_without_pattern_data_fails() {
        let table = RewardTable::new(vec![(RewardTier::PatternBreakthrough, 1.0)]).unwrap();
        let roller = RewardRoller::new(table, RewardConfig::default());
        let signals = RewardSignals {
            days_since_breakthrough: None,
            streak_days: 0,
            has_pattern_data: false,
        };
        let mut rng = StdRng::seed_from_u64(3);
        assert!(roller.roll(Some(&signals), &mut rng).is_err());
    }

    #[test]
    fn parse_reads_weight_pairs() {
        let table = RewardTable::parse("standard=0.6, bonus_insight=0.3,pattern_breakthrough=0.1")
            .unwrap();
        assert_eq!(table.weight(RewardTier::BonusInsight), 0.3);

        assert!(RewardTable::parse("standard").is_err());
        assert!(RewardTable::parse("jackpot=1.0").is_err());
        assert!(RewardTable::parse("standard=lots").is_err());
        assert!(RewardTable::parse("").is_err());
    }

    #[test]
    fn select_tier_skips_zero_weight_tiers() {
        let probs = vec![
            (RewardTier::Standard, 0.5),
            (RewardTier::BonusInsight, 0.5),
            (RewardTier::PatternBreakthrough, 0.0),
        ];
        assert_eq!(select_tier(&probs, 0.999_999_999).tier, RewardTier::BonusInsight);
        assert_eq!(select_tier(&probs, 0.0).tier, RewardTier::Standard);
    }
}
