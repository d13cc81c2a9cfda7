//! DLP policy evaluation: maps a classification plus an action's
//! allowance rule into an allow/redact/block decision.

use super::selectors::{Classification, Level};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Allow,
    Redact,
    Block,
}

/// A named policy rule, e.g. `AI_CLOUD_PROCESSING`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub name: String,
    pub max_allowed: Level,
    pub allow_restricted_content: bool,
    pub redact_disallowed: bool,
}

impl Policy {
    pub fn ai_cloud_processing_default() -> Self {
        Self {
            name: "AI_CLOUD_PROCESSING".into(),
            max_allowed: Level::Internal,
            allow_restricted_content: false,
            redact_disallowed: true,
        }
    }

    /// Evaluates a single classification against this policy:
    /// - ALLOW if `level <= max_allowed`, or `level == Restricted` and
    ///   restricted content is explicitly allowed.
    /// - REDACT if over the allowance and redaction is enabled.
    /// - BLOCK otherwise.
    pub fn evaluate(&self, classification: &Classification) -> Decision {
        let level = classification.level;
        let action = if level <= self.max_allowed || (level == Level::Restricted && self.allow_restricted_content) {
            Action::Allow
        } else if self.redact_disallowed {
            Action::Redact
        } else {
            Action::Block
        };
        Decision {
            action,
            matched_level: level,
            labels: classification.labels.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub action: Action,
    pub matched_level: Level,
    pub labels: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn within_allowance_is_allowed() {
        let policy = Policy::ai_cloud_processing_default();
        assert_eq!(
            policy.evaluate(&Classification::new(Level::Internal)).action,
            Action::Allow
        );
    }

    #[test]
    fn over_allowance_redacts_by_default() {
        let policy = Policy::ai_cloud_processing_default();
        assert_eq!(
            policy.evaluate(&Classification::new(Level::Confidential)).action,
            Action::Redact
        );
        assert_eq!(
            policy.evaluate(&Classification::new(Level::Restricted)).action,
            Action::Redact
        );
    }

    #[test]
    fn restricted_content_flag_allows_restricted() {
        let mut policy = Policy::ai_cloud_processing_default();
        policy.allow_restricted_content = true;
        assert_eq!(
            policy.evaluate(&Classification::new(Level::Restricted)).action,
            Action::Allow
        );
    }

    #[test]
    fn disabling_redaction_blocks_instead() {
        let mut policy = Policy::ai_cloud_processing_default();
        policy.redact_disallowed = false;
        assert_eq!(
            policy.evaluate(&Classification::new(Level::Confidential)).action,
            Action::Block
        );
    }
}
