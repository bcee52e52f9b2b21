//! Isolation forest outlier detection
//!
//! Points that are isolated by few random axis-aligned splits are outliers.
//! Scores follow the usual convention `-2^(-E[h(x)] / c(psi))`, so normal
//! points sit near -0.5 and strong outliers approach -1.

use super::{FittedDetector, OutlierDetector, OutlierScore};
use crate::error::ModelError;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Upper bound on the subsample drawn for each tree
const DEFAULT_MAX_SAMPLES: usize = 256;

const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

/// Isolation forest configuration
#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub estimators: usize,
    pub max_samples: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl IsolationForest {
    pub fn new(estimators: usize, contamination: f64, seed: u64) -> Self {
        Self {
            estimators,
            max_samples: DEFAULT_MAX_SAMPLES,
            contamination,
            seed,
        }
    }
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::new(100, 0.1, 42)
    }
}

impl OutlierDetector for IsolationForest {
    fn fit(&self, samples: &[[f64; 2]]) -> Result<Box<dyn FittedDetector>, ModelError> {
        if samples.is_empty() {
            return Err(ModelError::InvalidInput("no samples".to_string()));
        }
        if samples.iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput(
                "samples contain non-finite values".to_string(),
            ));
        }
        if self.estimators == 0 {
            return Err(ModelError::Fit("forest needs at least one tree".to_string()));
        }

        let sample_size = self.max_samples.min(samples.len());
        let height_limit = (sample_size.max(2) as f64).log2().ceil() as usize;
        let mut rng = StdRng::seed_from_u64(self.seed);

        let trees = (0..self.estimators)
            .map(|_| {
                let picked: Vec<[f64; 2]> = index::sample(&mut rng, samples.len(), sample_size)
                    .into_iter()
                    .map(|i| samples[i])
                    .collect();
                IsolationTree::build(&picked, 0, height_limit, &mut rng)
            })
            .collect();

        let mut forest = FittedForest {
            trees,
            normalizer: average_path_length(sample_size),
            threshold: 0.0,
        };

        let mut training_scores: Vec<f64> = samples.iter().map(|p| forest.raw_score(*p)).collect();
        forest.threshold = percentile(&mut training_scores, self.contamination);

        Ok(Box::new(forest))
    }
}

/// Expected path length of an unsuccessful BST search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

#[derive(Debug)]
enum IsolationTree {
    Leaf {
        size: usize,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: Box<IsolationTree>,
        right: Box<IsolationTree>,
    },
}

impl IsolationTree {
    fn build(points: &[[f64; 2]], depth: usize, height_limit: usize, rng: &mut StdRng) -> Self {
        if depth >= height_limit || points.len() <= 1 {
            return IsolationTree::Leaf { size: points.len() };
        }

        // Only features that still vary can split the node
        let splittable: Vec<(usize, f64, f64)> = (0..2)
            .filter_map(|feature| {
                let (min, max) = points
                    .iter()
                    .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), p| {
                        (lo.min(p[feature]), hi.max(p[feature]))
                    });
                (max > min).then_some((feature, min, max))
            })
            .collect();

        if splittable.is_empty() {
            return IsolationTree::Leaf { size: points.len() };
        }

        let (feature, min, max) = splittable[rng.gen_range(0..splittable.len())];
        let threshold = rng.gen_range(min..max);

        let (left, right): (Vec<[f64; 2]>, Vec<[f64; 2]>) =
            points.iter().partition(|p| p[feature] < threshold);

        IsolationTree::Split {
            feature,
            threshold,
            left: Box::new(Self::build(&left, depth + 1, height_limit, rng)),
            right: Box::new(Self::build(&right, depth + 1, height_limit, rng)),
        }
    }

    fn path_length(&self, point: [f64; 2]) -> f64 {
        let mut node = self;
        let mut depth = 0.0;
        loop {
            match node {
                IsolationTree::Leaf { size } => return depth + average_path_length(*size),
                IsolationTree::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if point[*feature] < *threshold { left } else { right };
                    depth += 1.0;
                }
            }
        }
    }
}

#[derive(Debug)]
struct FittedForest {
    trees: Vec<IsolationTree>,
    normalizer: f64,
    threshold: f64,
}

impl FittedForest {
    fn raw_score(&self, point: [f64; 2]) -> f64 {
        let mean_path =
            self.trees.iter().map(|t| t.path_length(point)).sum::<f64>() / self.trees.len() as f64;
        if self.normalizer <= 0.0 {
            return -0.5;
        }
        -(2f64.powf(-mean_path / self.normalizer))
    }
}

impl FittedDetector for FittedForest {
    fn score(&self, point: [f64; 2]) -> Result<OutlierScore, ModelError> {
        if point.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput("non-finite point".to_string()));
        }
        let raw_score = self.raw_score(point);
        Ok(OutlierScore {
            is_outlier: raw_score < self.threshold,
            raw_score,
        })
    }
}

/// Linear-interpolated quantile `q` in [0, 1] of `values`
fn percentile(values: &mut [f64], q: f64) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = q.clamp(0.0, 1.0) * (values.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    let fraction = rank - lower as f64;
    values[lower] + (values[upper] - values[lower]) * fraction
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Points peaked around (0.02, 0.01), built from sums of low-discrepancy sequences
    fn cluster(n: usize) -> Vec<[f64; 2]> {
        let frac = |x: f64| x - x.floor();
        (0..n)
            .map(|i| {
                let t = i as f64;
                [
                    0.02 + 0.004 * (frac(t * 0.618_034) + frac(t * 0.414_214) - 1.0),
                    0.01 + 0.004 * (frac(t * 0.732_051) + frac(t * 0.236_068) - 1.0),
                ]
            })
            .collect()
    }

    #[test]
    fn test_average_path_length() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) is about 10.24
        assert!((average_path_length(256) - 10.24).abs() < 0.01);
    }

    #[test]
    fn test_percentile() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile(&mut values, 0.0), 1.0);
        assert_eq!(percentile(&mut values, 0.5), 3.0);
        assert_eq!(percentile(&mut values, 1.0), 5.0);
        assert!((percentile(&mut values, 0.1) - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_empty_and_non_finite() {
        let forest = IsolationForest::default();
        assert!(forest.fit(&[]).is_err());
        assert!(forest.fit(&[[f64::NAN, 0.0]]).is_err());
    }

    #[test]
    fn test_outlier_scores_lower_than_inliers() {
        let fitted = IsolationForest::default().fit(&cluster(100)).unwrap();

        let inlier = fitted.score([0.02, 0.01]).unwrap();
        let outlier = fitted.score([0.5, 0.4]).unwrap();

        assert!(outlier.raw_score < inlier.raw_score);
        assert!(outlier.is_outlier);
        assert!(!inlier.is_outlier);
        assert!(outlier.raw_score >= -1.0 && outlier.raw_score < 0.0);
    }

    #[test]
    fn test_identical_samples_are_not_outliers() {
        let samples = vec![[0.02, 0.0]; 30];
        let fitted = IsolationForest::default().fit(&samples).unwrap();

        let verdict = fitted.score([0.02, 0.0]).unwrap();
        assert!(!verdict.is_outlier);
    }

    #[test]
    fn test_seeded_forest_is_reproducible() {
        let samples = cluster(60);
        let a = IsolationForest::default().fit(&samples).unwrap();
        let b = IsolationForest::default().fit(&samples).unwrap();

        let point = [0.03, 0.02];
        assert_eq!(a.score(point).unwrap(), b.score(point).unwrap());
    }
}
