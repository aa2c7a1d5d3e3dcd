// Engine configuration - thresholds and policies consumed by the core

use serde::{Deserialize, Serialize};

/// What happens when two reviewers race on the same exception.
/// The store serializes per-entity writes either way; this only decides
/// whether the losing request is retried against the winner's state or
/// bounced back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Re-apply the losing transition against the post-winner state (default)
    LastWriterWins,
    /// Fail the losing request with a conflict error; caller retries
    Reject,
}

impl ConflictPolicy {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "last-writer-wins" => Some(ConflictPolicy::LastWriterWins),
            "reject" => Some(ConflictPolicy::Reject),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Amount difference above which an exception is classified high severity
    pub high_amount_threshold: f64,

    /// Tolerance for treating two amounts as equal (floating-point noise)
    pub amount_tolerance: f64,

    /// Hard cap on query page size
    pub max_page_limit: u32,

    pub conflict_policy: ConflictPolicy,
}

impl EngineConfig {
    pub fn new() -> Self {
        EngineConfig {
            high_amount_threshold: 1000.0,
            amount_tolerance: 0.01,
            max_page_limit: 100,
            conflict_policy: ConflictPolicy::LastWriterWins,
        }
    }

    pub fn with_high_amount_threshold(mut self, threshold: f64) -> Self {
        self.high_amount_threshold = threshold;
        self
    }

    pub fn with_max_page_limit(mut self, limit: u32) -> Self {
        self.max_page_limit = limit;
        self
    }

    pub fn with_conflict_policy(mut self, policy: ConflictPolicy) -> Self {
        self.conflict_policy = policy;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conflict_policy_parse() {
        assert_eq!(
            ConflictPolicy::parse("last-writer-wins"),
            Some(ConflictPolicy::LastWriterWins)
        );
        assert_eq!(ConflictPolicy::parse("reject"), Some(ConflictPolicy::Reject));
        assert_eq!(ConflictPolicy::parse("merge"), None);
    }

    #[test]
    fn test_builder_chain() {
        let config = EngineConfig::new()
            .with_high_amount_threshold(500.0)
            .with_max_page_limit(25)
            .with_conflict_policy(ConflictPolicy::Reject);

        assert_eq!(config.high_amount_threshold, 500.0);
        assert_eq!(config.max_page_limit, 25);
        assert_eq!(config.conflict_policy, ConflictPolicy::Reject);
    }
}
