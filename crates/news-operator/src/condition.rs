//! Status conditions shared by the Source and HotNews resources

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type recorded by the reconcilers.
///
/// The first status update ever written on a resource is `Added`; every later
/// one is `Updated`, regardless of whether the pass succeeded.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionType {
    Added,
    Updated,
}

impl ConditionType {
    /// Pick the condition type for the next status write.
    pub fn next(conditions: &[Condition]) -> Self {
        if conditions.is_empty() {
            ConditionType::Added
        } else {
            ConditionType::Updated
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Kubernetes-style condition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    /// RFC 3339 timestamp of the last change
    pub last_update_time: String,
    /// Machine-readable reason, e.g. `SuccessfulCreation`
    pub reason: String,
    pub message: String,
}

impl Condition {
    pub fn new(type_: ConditionType, success: bool, reason: &str, message: &str) -> Self {
        Self {
            type_,
            status: if success {
                ConditionStatus::True
            } else {
                ConditionStatus::False
            },
            last_update_time: chrono::Utc::now().to_rfc3339(),
            reason: reason.to_string(),
            message: message.to_string(),
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }

    fn same_outcome(&self, other: &Condition) -> bool {
        self.status == other.status && self.reason == other.reason && self.message == other.message
    }
}

/// Insert `condition`, replacing any existing entry of the same type.
///
/// An identical condition keeps its timestamp so that repeating an outcome
/// does not change the stored object.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_outcome(&condition) => {}
        Some(existing) => *existing = condition,
        None => conditions.push(condition),
    }
}

/// Condition reasons written by the reconcilers
pub mod reasons {
    pub const SUCCESSFUL_CREATION: &str = "SuccessfulCreation";
    pub const FAILED_CREATION: &str = "FailedCreation";
    pub const SUCCESSFUL_UPDATE: &str = "SuccessfulUpdate";
    pub const FAILED_UPDATE: &str = "FailedUpdate";
    pub const CONFIG_MAP_NOT_FOUND: &str = "ConfigMapNotFound";
    pub const OWNER_REFERENCE_FAILED: &str = "OwnerReferenceFailed";
    pub const FETCH_ARTICLES_FAILED: &str = "FetchArticlesFailed";
    pub const UPDATE_STATUS_FAILED: &str = "UpdateStatusFailed";
    pub const RECONCILED: &str = "Reconciled";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_type_is_added_for_empty_list() {
        assert_eq!(ConditionType::next(&[]), ConditionType::Added);
    }

    #[test]
    fn test_next_type_is_updated_after_failed_add() {
        // A failed first attempt still counts as "already added"
        let conditions = vec![Condition::new(
            ConditionType::Added,
            false,
            reasons::FAILED_CREATION,
            "connection refused",
        )];
        assert_eq!(ConditionType::next(&conditions), ConditionType::Updated);
    }

    #[test]
    fn test_set_condition_replaces_same_type() {
        let mut conditions = vec![Condition::new(
            ConditionType::Updated,
            false,
            reasons::FETCH_ARTICLES_FAILED,
            "timeout",
        )];

        set_condition(
            &mut conditions,
            Condition::new(ConditionType::Updated, true, reasons::RECONCILED, "ok"),
        );

        assert_eq!(conditions.len(), 1);
        assert!(conditions[0].is_true());
        assert_eq!(conditions[0].reason, reasons::RECONCILED);
    }

    #[test]
    fn test_set_condition_keeps_timestamp_for_same_outcome() {
        let mut first = Condition::new(ConditionType::Updated, true, reasons::RECONCILED, "ok");
        first.last_update_time = "2024-01-01T00:00:00+00:00".to_string();
        let mut conditions = vec![first.clone()];

        set_condition(
            &mut conditions,
            Condition::new(ConditionType::Updated, true, reasons::RECONCILED, "ok"),
        );

        assert_eq!(conditions, vec![first]);
    }

    #[test]
    fn test_set_condition_appends_new_type() {
        let mut conditions = vec![Condition::new(
            ConditionType::Added,
            true,
            reasons::SUCCESSFUL_CREATION,
            "",
        )];

        set_condition(
            &mut conditions,
            Condition::new(ConditionType::Updated, true, reasons::SUCCESSFUL_UPDATE, ""),
        );

        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].type_, ConditionType::Added);
        assert_eq!(conditions[1].type_, ConditionType::Updated);
    }

    #[test]
    fn test_condition_serializes_camel_case() {
        let cond = Condition::new(ConditionType::Added, true, "SuccessfulCreation", "created");
        let value = serde_json::to_value(&cond).unwrap();
        assert_eq!(value["type"], "Added");
        assert_eq!(value["status"], "True");
        assert!(value.get("lastUpdateTime").is_some());
    }
}
