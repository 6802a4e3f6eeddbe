//! Score resolvers reduce several candidate confidences to one.

use serde::{Deserialize, Serialize};

/// Strategy reducing multiple scores to a single one. `None` for an empty input.
pub trait Resolver {
    fn resolve(&self, scores: &[f64]) -> Option<f64>;
}

/// Built-in resolvers selectable from an evaluation profile.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoreResolver {
    /// The most conservative score wins.
    #[default]
    Min,
    Max,
    Mean,
}

impl Resolver for ScoreResolver {
    fn resolve(&self, scores: &[f64]) -> Option<f64> {
        if scores.is_empty() {
            return None;
        }
        let resolved = match self {
            Self::Min => scores.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => scores.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
        };
        Some(resolved)
    }
}

/// Arithmetic mean, `0.0` for no scores.
pub fn mean(scores: &[f64]) -> f64 {
    if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Adapter for ad-hoc resolver closures.
    struct FnResolver<F>(F);

    impl<F> Resolver for FnResolver<F>
    where
        F: Fn(&[f64]) -> Option<f64>,
    {
        fn resolve(&self, scores: &[f64]) -> Option<f64> {
            (self.0)(scores)
        }
    }

    #[test]
    fn test_builtin_resolvers() {
        let scores = [0.9, 0.5, 0.7];
        assert_eq!(ScoreResolver::Min.resolve(&scores), Some(0.5));
        assert_eq!(ScoreResolver::Max.resolve(&scores), Some(0.9));
        let mean = ScoreResolver::Mean.resolve(&scores).unwrap();
        assert!((mean - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_empty_scores_resolve_to_none() {
        assert_eq!(ScoreResolver::Min.resolve(&[]), None);
        assert_eq!(mean(&[]), 0.0);
    }

    #[test]
    fn test_closure_resolver() {
        let first = FnResolver(|scores: &[f64]| scores.first().copied());
        assert_eq!(first.resolve(&[0.3, 0.1]), Some(0.3));
    }

    #[test]
    fn test_resolver_from_profile_json() {
        let r: ScoreResolver = serde_json::from_str("\"mean\"").unwrap();
        assert_eq!(r, ScoreResolver::Mean);
    }
}
