//! Materialization candidates and the final selection strategies.

use common::{GlobalStrategy, MaterializationSettings};
use std::fmt;

/// A candidate operator output to persist between runs.
#[derive(Debug, Clone, PartialEq)]
pub struct MaterializationPoint {
    /// Lineage signature of the producing operator.
    pub lineage: String,
    /// Expected recomputation cost from `start`, in milliseconds.
    pub cost_ms: f64,
    /// Probability the operator is executed again.
    pub prob: f64,
    /// Estimated artifact size in bytes.
    pub bytes: u64,
    /// Recomputation cost minus the write penalty, in milliseconds.
    pub benefit_ms: f64,
}

impl fmt::Display for MaterializationPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (cost {:.0} ms, prob {:.2}, {} bytes, benefit {:.0} ms)",
            self.lineage, self.cost_ms, self.prob, self.bytes, self.benefit_ms
        )
    }
}

/// Milliseconds needed to write `bytes` at the configured throughput.
pub fn write_penalty_ms(bytes: u64, throughput_mibs: u64) -> f64 {
    if throughput_mibs == 0 {
        return 0.0;
    }
    bytes as f64 * 1000.0 / (throughput_mibs as f64 * 1024.0 * 1024.0)
}

/// Drop candidates below the thresholds, then apply the global strategy.
pub fn select(
    mut candidates: Vec<MaterializationPoint>,
    settings: &MaterializationSettings,
) -> Vec<MaterializationPoint> {
    candidates.retain(|p| {
        p.benefit_ms > 0.0
            && p.benefit_ms >= settings.min_benefit_ms as f64
            && p.prob >= settings.prob_threshold
    });
    if candidates.is_empty() {
        return candidates;
    }
    match settings.global_strategy {
        GlobalStrategy::AllAboveThreshold => candidates,
        GlobalStrategy::GreatestBenefit => {
            vec![take_max_by(candidates, |p| p.benefit_ms)]
        }
        GlobalStrategy::GreatestProb => vec![take_max_by(candidates, |p| p.prob)],
        GlobalStrategy::Product => {
            vec![take_max_by(candidates, |p| p.benefit_ms * p.prob)]
        }
    }
}

fn take_max_by(
    candidates: Vec<MaterializationPoint>,
    score: impl Fn(&MaterializationPoint) -> f64,
) -> MaterializationPoint {
    candidates
        .into_iter()
        .reduce(|best, p| if score(&p) > score(&best) { p } else { best })
        .expect("candidates are non-empty")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(lineage: &str, prob: f64, benefit_s: f64) -> MaterializationPoint {
        MaterializationPoint {
            lineage: lineage.to_string(),
            cost_ms: benefit_s * 1000.0 + 100.0,
            prob,
            bytes: 1024,
            benefit_ms: benefit_s * 1000.0,
        }
    }

    fn settings(prob_threshold: f64, min_benefit_ms: u64) -> MaterializationSettings {
        MaterializationSettings {
            prob_threshold,
            min_benefit_ms,
            global_strategy: GlobalStrategy::AllAboveThreshold,
            ..Default::default()
        }
    }

    #[test]
    fn threshold_acceptance_table() {
        let s = settings(0.9, 1_000);
        assert!(select(vec![point("a", 0.5, 10.0)], &s).is_empty());
        assert!(select(vec![point("b", 1.0, 0.5)], &s).is_empty());
        assert_eq!(select(vec![point("c", 1.0, 5.0)], &s).len(), 1);
    }

    #[test]
    fn negative_benefit_is_dropped() {
        let s = settings(0.0, 0);
        assert!(select(vec![point("a", 1.0, -1.0)], &s).is_empty());
    }

    #[test]
    fn greatest_benefit_picks_one() {
        let mut s = settings(0.0, 0);
        s.global_strategy = GlobalStrategy::GreatestBenefit;
        let picked = select(
            vec![point("a", 0.9, 2.0), point("b", 0.1, 8.0)],
            &s,
        );
        assert_eq!(picked.len(), 1);
        assert_eq!(picked[0].lineage, "b");
    }

    #[test]
    fn product_weighs_benefit_by_prob() {
        let mut s = settings(0.0, 0);
        s.global_strategy = GlobalStrategy::Product;
        let picked = select(
            vec![point("a", 0.9, 4.0), point("b", 0.1, 8.0)],
            &s,
        );
        assert_eq!(picked[0].lineage, "a");
    }

    #[test]
    fn write_penalty_scales_with_throughput() {
        // 100 MiB at 100 MiB/s is one second.
        assert_eq!(write_penalty_ms(100 * 1024 * 1024, 100), 1000.0);
        assert_eq!(write_penalty_ms(1024, 0), 0.0);
    }
}
