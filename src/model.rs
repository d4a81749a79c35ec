//! The pre-trained scoring capability. The trained ensemble is shipped as a
//! portable JSON artifact (a bag of regression trees over the 30 features
//! plus a logistic link) and consumed as a black box: loaded once at
//! startup, never retrained or mutated here.

use crate::features::FeatureVector;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Raw class 1 maps to Safe, -1 to Phishing. This polarity is a contract
/// of the trained artifact, not something derived here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Safe,
    Phishing,
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Verdict::Safe => write!(f, "Safe"),
            Verdict::Phishing => write!(f, "Phishing"),
        }
    }
}

/// Output of one classification. Probabilities are calibrated, sum to 1,
/// and are kept at full precision; rounding happens only at presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct Classification {
    pub label: Verdict,
    pub safe_probability: f64,
    pub phishing_probability: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
    Leaf {
        value: f64,
    },
}

impl TreeNode {
    fn eval(&self, features: &[i8]) -> f64 {
        match self {
            TreeNode::Leaf { value } => *value,
            TreeNode::Split {
                feature,
                threshold,
                left,
                right,
            } => {
                if f64::from(features[*feature]) <= *threshold {
                    left.eval(features)
                } else {
                    right.eval(features)
                }
            }
        }
    }

    fn max_feature(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 0,
            TreeNode::Split {
                feature,
                left,
                right,
                ..
            } => (*feature).max(left.max_feature()).max(right.max_feature()),
        }
    }
}

/// On-disk model representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct ModelArtifact {
    /// Additive margin offset applied before the trees.
    bias: f64,
    /// Scales every tree's contribution.
    learning_rate: f64,
    trees: Vec<TreeNode>,
}

/// Loaded, read-only scoring capability. Safe for unsynchronized concurrent
/// reads; callers share it behind an `Arc`.
pub struct ScoringModel {
    artifact: ModelArtifact,
}

impl ScoringModel {
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read model file: {path}"))?;
        Self::from_json(&content).with_context(|| format!("Failed to parse model file: {path}"))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let artifact: ModelArtifact = serde_json::from_str(json)?;
        if artifact.trees.is_empty() {
            anyhow::bail!("Model artifact contains no trees");
        }
        for (i, tree) in artifact.trees.iter().enumerate() {
            let max = tree.max_feature();
            if max >= FeatureVector::LEN {
                anyhow::bail!(
                    "Tree {i} references feature {max}, but vectors have {} slots",
                    FeatureVector::LEN
                );
            }
        }
        Ok(ScoringModel { artifact })
    }

    /// Score a complete vector. Positive margin means the safe class.
    pub fn classify(&self, vector: &FeatureVector) -> Classification {
        let features = vector.as_i8();
        let margin: f64 = self.artifact.bias
            + self
                .artifact
                .trees
                .iter()
                .map(|t| t.eval(&features) * self.artifact.learning_rate)
                .sum::<f64>();

        let safe_probability = sigmoid(margin);
        let phishing_probability = 1.0 - safe_probability;
        let raw_class: i8 = if safe_probability >= 0.5 { 1 } else { -1 };
        let label = if raw_class == 1 {
            Verdict::Safe
        } else {
            Verdict::Phishing
        };

        Classification {
            label,
            safe_probability,
            phishing_probability,
        }
    }
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Round a probability to two decimals for display and persistence.
pub fn display_probability(p: f64) -> f64 {
    (p * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{Ternary, SCHEMA};

    fn stump(feature: usize, weight: f64) -> TreeNode {
        TreeNode::Split {
            feature,
            threshold: 0.0,
            left: Box::new(TreeNode::Leaf { value: -weight }),
            right: Box::new(TreeNode::Leaf { value: weight }),
        }
    }

    fn test_model() -> ScoringModel {
        let artifact = ModelArtifact {
            bias: 0.0,
            learning_rate: 0.5,
            trees: (0..FeatureVector::LEN).map(|i| stump(i, 0.4)).collect(),
        };
        let json = serde_json::to_string(&artifact).unwrap();
        ScoringModel::from_json(&json).unwrap()
    }

    fn uniform_vector(value: Ternary) -> FeatureVector {
        FeatureVector::from_values(vec![value; SCHEMA.len()]).unwrap()
    }

    #[test]
    fn test_all_legit_scores_safe() {
        let model = test_model();
        let result = model.classify(&uniform_vector(Ternary::Legit));
        assert_eq!(result.label, Verdict::Safe);
        assert!(result.safe_probability > 0.95);
        assert!((result.safe_probability + result.phishing_probability - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_all_phishing_scores_phishing() {
        let model = test_model();
        let result = model.classify(&uniform_vector(Ternary::Phishing));
        assert_eq!(result.label, Verdict::Phishing);
        assert!(result.phishing_probability > 0.95);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let model = test_model();
        let vector = uniform_vector(Ternary::Neutral);
        let first = model.classify(&vector);
        for _ in 0..10 {
            let again = model.classify(&vector);
            assert_eq!(again.label, first.label);
            assert_eq!(again.safe_probability, first.safe_probability);
            assert_eq!(again.phishing_probability, first.phishing_probability);
        }
    }

    #[test]
    fn test_artifact_json_round_trip() {
        let json = r#"{
            "bias": 0.1,
            "learning_rate": 1.0,
            "trees": [
                {"feature": 0, "threshold": 0.0,
                 "left": {"value": -0.5}, "right": {"value": 0.5}}
            ]
        }"#;
        let model = ScoringModel::from_json(json).unwrap();
        let safe = model.classify(&uniform_vector(Ternary::Legit));
        assert_eq!(safe.label, Verdict::Safe);
    }

    #[test]
    fn test_rejects_out_of_range_feature() {
        let json = r#"{
            "bias": 0.0,
            "learning_rate": 1.0,
            "trees": [
                {"feature": 30, "threshold": 0.0,
                 "left": {"value": -0.5}, "right": {"value": 0.5}}
            ]
        }"#;
        assert!(ScoringModel::from_json(json).is_err());
    }

    #[test]
    fn test_rejects_empty_artifact() {
        assert!(ScoringModel::from_json(r#"{"bias":0.0,"learning_rate":1.0,"trees":[]}"#).is_err());
    }

    #[test]
    fn test_display_rounding() {
        assert_eq!(display_probability(0.876543), 0.88);
        assert_eq!(display_probability(0.1), 0.1);
    }
}
