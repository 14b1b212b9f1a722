//! Installation status conditions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Status of a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Well-defined codes attached to conditions that report a problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    /// The last error occurred due to invalid credentials.
    #[serde(rename = "ERR_UNAUTHORIZED")]
    Unauthorized,
    /// The last error occurred because resources are stuck in deletion.
    #[serde(rename = "ERR_CLEANUP")]
    CleanupResources,
    /// The last error occurred due to a configuration problem.
    #[serde(rename = "ERR_CONFIGURATION_PROBLEM")]
    ConfigurationProblem,
}

/// Holds the information about the state of an installation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub condition_type: String,
    pub status: ConditionStatus,
    pub last_transition_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub reason: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub codes: Vec<ErrorCode>,
}

impl Condition {
    pub fn new(condition_type: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            condition_type: condition_type.into(),
            status: ConditionStatus::Unknown,
            last_transition_time: now,
            last_update_time: now,
            reason: "ConditionInitialized".to_string(),
            message: "The condition has been initialized but its semantic check has not been performed yet.".to_string(),
            codes: Vec::new(),
        }
    }

    /// Update the condition in place.
    ///
    /// `last_update_time` always moves; `last_transition_time` only moves
    /// when the status actually changes.
    pub fn update(
        &mut self,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
        codes: Vec<ErrorCode>,
    ) {
        let now = Utc::now();
        if self.status != status {
            self.last_transition_time = now;
        }
        self.status = status;
        self.last_update_time = now;
        self.reason = reason.into();
        self.message = message.into();
        self.codes = codes;
    }
}

/// Find a condition by type.
pub fn get_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions
        .iter()
        .find(|c| c.condition_type == condition_type)
}

/// Update or insert the condition of the given type and return a copy of it.
pub fn update_condition(
    conditions: &mut Vec<Condition>,
    condition_type: &str,
    status: ConditionStatus,
    reason: impl Into<String>,
    message: impl Into<String>,
    codes: Vec<ErrorCode>,
) -> Condition {
    let idx = match conditions
        .iter()
        .position(|c| c.condition_type == condition_type)
    {
        Some(idx) => idx,
        None => {
            conditions.push(Condition::new(condition_type));
            conditions.len() - 1
        }
    };
    conditions[idx].update(status, reason, message, codes);
    conditions[idx].clone()
}
