//! Severity classification for damage clusters.
//!
//! The classifier is a pure function of damage type, best confidence and
//! member count. Rules are plain data so deployments can retune them.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }
}

/// How a tier combines its confidence and evidence conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Combine {
    #[default]
    Any,
    All,
}

/// Conditions for reaching one severity tier. Comparisons are inclusive
/// unless `strict` is set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TierRule {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence: Option<f64>,
    #[serde(default)]
    pub combine: Combine,
    #[serde(default)]
    pub strict: bool,
}

impl TierRule {
    pub fn confidence(min: f64) -> Self {
        Self {
            confidence: Some(min),
            ..Default::default()
        }
    }

    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn passes(&self, value: f64, min: f64) -> bool {
        if self.strict {
            value > min
        } else {
            value >= min
        }
    }

    pub fn is_met(&self, confidence: f64, evidence: f64) -> bool {
        let by_confidence = self.confidence.map(|min| self.passes(confidence, min));
        let by_evidence = self.evidence.map(|min| self.passes(evidence, min));
        match (by_confidence, by_evidence) {
            (None, None) => false,
            (Some(c), None) => c,
            (None, Some(e)) => e,
            (Some(c), Some(e)) => match self.combine {
                Combine::Any => c || e,
                Combine::All => c && e,
            },
        }
    }
}

/// High and medium tiers of one damage type. A missing tier is never reached.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SeverityRule {
    #[serde(default)]
    pub high: Option<TierRule>,
    #[serde(default)]
    pub medium: Option<TierRule>,
}

impl SeverityRule {
    pub fn thresholds(high: f64, medium: f64) -> Self {
        Self {
            high: Some(TierRule::confidence(high)),
            medium: Some(TierRule::confidence(medium)),
        }
    }

    pub fn evaluate(&self, confidence: f64, evidence: f64) -> Severity {
        let met = |tier: &Option<TierRule>| {
            tier.as_ref()
                .map_or(false, |rule| rule.is_met(confidence, evidence))
        };
        if met(&self.high) {
            Severity::High
        } else if met(&self.medium) {
            Severity::Medium
        } else {
            Severity::Low
        }
    }
}

/// Normalized corroboration: one third per member, capped at 1.0.
pub fn evidence_factor(member_count: usize) -> f64 {
    (member_count as f64 / 3.0).min(1.0)
}

/// Per-type rules with a fallback for types without an entry. Keys are
/// matched case-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SeverityTable {
    pub default_rule: SeverityRule,
    #[serde(deserialize_with = "lowercase_keys")]
    pub rules: BTreeMap<String, SeverityRule>,
}

fn lowercase_keys<'de, D>(deserializer: D) -> Result<BTreeMap<String, SeverityRule>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, SeverityRule>::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .map(|(key, rule)| (key.to_lowercase(), rule))
        .collect())
}

impl Default for SeverityTable {
    fn default() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "pothole".to_string(),
            SeverityRule {
                high: Some(TierRule {
                    confidence: Some(0.80),
                    evidence: Some(0.7),
                    combine: Combine::Any,
                    strict: true,
                }),
                medium: Some(TierRule::confidence(0.60).strict()),
            },
        );
        rules.insert(
            "crack".to_string(),
            SeverityRule {
                high: None,
                medium: Some(TierRule {
                    confidence: Some(0.75),
                    evidence: Some(0.5),
                    combine: Combine::All,
                    strict: true,
                }),
            },
        );
        Self {
            default_rule: SeverityRule::thresholds(0.85, 0.70),
            rules,
        }
    }
}

impl SeverityTable {
    /// Table with no per-type entries.
    pub fn uniform(rule: SeverityRule) -> Self {
        Self {
            default_rule: rule,
            rules: BTreeMap::new(),
        }
    }

    pub fn with_rule(mut self, damage_type: &str, rule: SeverityRule) -> Self {
        self.rules.insert(damage_type.to_lowercase(), rule);
        self
    }

    pub fn rule_for(&self, damage_type: &str) -> &SeverityRule {
        self.rules
            .get(&damage_type.to_lowercase())
            .or_else(|| {
                self.rules
                    .iter()
                    .find(|(key, _)| key.eq_ignore_ascii_case(damage_type))
                    .map(|(_, rule)| rule)
            })
            .unwrap_or(&self.default_rule)
    }

    pub fn classify(&self, damage_type: &str, best_confidence: f64, member_count: usize) -> Severity {
        debug_assert!(member_count > 0, "classifying an empty cluster");
        self.rule_for(damage_type)
            .evaluate(best_confidence, evidence_factor(member_count))
    }
}
