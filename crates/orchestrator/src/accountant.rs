//! Token accounting: estimation and per-layer budget allocation.
//!
//! The estimator is the 4-chars-per-token heuristic shared with the rest of
//! the engine (`durandal_core::estimate_tokens`); swapping in a precise
//! tokenizer would change nothing else.

use serde::{Deserialize, Serialize};

/// Estimate the token count of a text fragment. Deterministic upper bound.
pub fn estimate(text: &str) -> usize {
    durandal_core::estimate_tokens(text)
}

/// Relative layer weights for budget allocation. Must not all be zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LayerWeights {
    pub recent_dialogue: f64,
    pub artifacts: f64,
    pub summary: f64,
    pub project: f64,
    pub headroom: f64,
}

impl Default for LayerWeights {
    fn default() -> Self {
        Self {
            recent_dialogue: 0.40,
            artifacts: 0.30,
            summary: 0.15,
            project: 0.10,
            headroom: 0.05,
        }
    }
}

/// A named allocation preset. Operationally nothing but a `LayerWeights`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// The default calibration.
    Intelligent,
    /// Artifact-heavy: favors retrieved knowledge over dialogue.
    Aggressive,
    /// Dialogue-heavy, no reserved headroom.
    Maximum,
    /// Maximal recent-dialogue window, minimal project layer.
    Revolutionary,
}

impl Mode {
    pub fn weights(&self) -> LayerWeights {
        match self {
            Mode::Intelligent => LayerWeights::default(),
            Mode::Aggressive => LayerWeights {
                recent_dialogue: 0.30,
                artifacts: 0.40,
                summary: 0.15,
                project: 0.10,
                headroom: 0.05,
            },
            Mode::Maximum => LayerWeights {
                recent_dialogue: 0.45,
                artifacts: 0.35,
                summary: 0.10,
                project: 0.10,
                headroom: 0.0,
            },
            Mode::Revolutionary => LayerWeights {
                recent_dialogue: 0.50,
                artifacts: 0.30,
                summary: 0.15,
                project: 0.05,
                headroom: 0.0,
            },
        }
    }
}

/// Integer token caps per layer. Sums to at most the allocated total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayerBudgets {
    pub recent_dialogue: usize,
    pub artifacts: usize,
    pub summary: usize,
    pub project: usize,
    pub headroom: usize,
}

impl LayerBudgets {
    pub fn sum(&self) -> usize {
        self.recent_dialogue + self.artifacts + self.summary + self.project + self.headroom
    }
}

/// Allocate a total budget across layers.
///
/// Each layer gets `floor(total × weight)`, raised to `min_per_layer` when
/// its weight is positive; if the raises overshoot the total, every
/// allocation is scaled back proportionally. The result always sums to at
/// most `total`.
pub fn allocate(total: usize, weights: &LayerWeights, min_per_layer: usize) -> LayerBudgets {
    let alloc = |weight: f64| -> usize {
        if weight <= 0.0 {
            0
        } else {
            ((total as f64 * weight) as usize).max(min_per_layer)
        }
    };

    let mut budgets = LayerBudgets {
        recent_dialogue: alloc(weights.recent_dialogue),
        artifacts: alloc(weights.artifacts),
        summary: alloc(weights.summary),
        project: alloc(weights.project),
        headroom: alloc(weights.headroom),
    };

    let sum = budgets.sum();
    if sum > total && sum > 0 {
        let scale = total as f64 / sum as f64;
        let rescale = |v: usize| (v as f64 * scale) as usize;
        budgets = LayerBudgets {
            recent_dialogue: rescale(budgets.recent_dialogue),
            artifacts: rescale(budgets.artifacts),
            summary: rescale(budgets.summary),
            project: rescale(budgets.project),
            headroom: rescale(budgets.headroom),
        };
    }
    budgets
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_matches_heuristic() {
        assert_eq!(estimate(""), 0);
        assert_eq!(estimate("abcd"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn estimate_subadditivity() {
        let pairs = [("hello ", "world"), ("a", "b"), ("", "xyz"), ("12345", "678")];
        for (a, b) in pairs {
            let joined = format!("{a}{b}");
            assert!(estimate(&joined) <= estimate(a) + estimate(b) + 1);
        }
    }

    #[test]
    fn default_allocation_shares() {
        let budgets = allocate(4096, &LayerWeights::default(), 64);
        assert_eq!(budgets.recent_dialogue, 1638); // 40%
        assert_eq!(budgets.artifacts, 1228); // 30%
        assert_eq!(budgets.summary, 614); // 15%
        assert_eq!(budgets.project, 409); // 10%
        assert_eq!(budgets.headroom, 204); // 5%
        assert!(budgets.sum() <= 4096);
    }

    #[test]
    fn small_budget_raises_to_floor() {
        let budgets = allocate(400, &LayerWeights::default(), 64);
        // 10% of 400 = 40 < 64: project raised before rescaling
        assert!(budgets.project >= 40);
        assert!(budgets.sum() <= 400);
    }

    #[test]
    fn zero_weight_layer_gets_nothing() {
        let weights = LayerWeights {
            summary: 0.0,
            ..LayerWeights::default()
        };
        let budgets = allocate(4096, &weights, 64);
        assert_eq!(budgets.summary, 0);
    }

    #[test]
    fn allocation_never_exceeds_total() {
        for total in [64, 100, 320, 1000, 4096, 200_000] {
            let budgets = allocate(total, &LayerWeights::default(), 64);
            assert!(budgets.sum() <= total, "overshoot at total={total}");
        }
    }

    #[test]
    fn mode_weights_sum_to_one() {
        for mode in [
            Mode::Intelligent,
            Mode::Aggressive,
            Mode::Maximum,
            Mode::Revolutionary,
        ] {
            let w = mode.weights();
            let sum = w.recent_dialogue + w.artifacts + w.summary + w.project + w.headroom;
            assert!((sum - 1.0).abs() < 1e-9, "{mode:?} sums to {sum}");
        }
    }
}
