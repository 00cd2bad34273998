//! # Routing Policy Models
//!
//! Operator-defined routing rules and their append-only audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    AllowedPair,
    ForbiddenPair,
    PathRequirement,
    Constraint,
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllowedPair => write!(f, "allowed_pair"),
            Self::ForbiddenPair => write!(f, "forbidden_pair"),
            Self::PathRequirement => write!(f, "path_requirement"),
            Self::Constraint => write!(f, "constraint"),
        }
    }
}

impl std::str::FromStr for PolicyType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed_pair" => Ok(Self::AllowedPair),
            "forbidden_pair" => Ok(Self::ForbiddenPair),
            "path_requirement" => Ok(Self::PathRequirement),
            "constraint" => Ok(Self::Constraint),
            _ => Err(format!("Invalid policy type: {s}")),
        }
    }
}

/// Comparison used by `constraint` policies
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
}

impl ConstraintOperator {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "equals" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "starts_with" => Some(Self::StartsWith),
            "ends_with" => Some(Self::EndsWith),
            _ => None,
        }
    }

    /// Unknown or missing operators compare with `equals`
    pub fn parse_lenient(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some("contains") => Self::Contains,
            Some("starts_with") => Self::StartsWith,
            Some("ends_with") => Self::EndsWith,
            _ => Self::Equals,
        }
    }

    pub fn matches(&self, actual: &str, expected: &str) -> bool {
        match self {
            Self::Equals => actual == expected,
            Self::Contains => actual.to_lowercase().contains(&expected.to_lowercase()),
            Self::StartsWith => actual.to_lowercase().starts_with(&expected.to_lowercase()),
            Self::EndsWith => actual.to_lowercase().ends_with(&expected.to_lowercase()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicy {
    pub id: Uuid,
    pub name: String,
    pub policy_type: PolicyType,
    pub enabled: bool,
    pub priority: i32,
    pub source_pattern: Option<String>,
    pub destination_pattern: Option<String>,
    pub constraint_field: Option<String>,
    pub constraint_value: Option<String>,
    pub constraint_operator: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// New RoutingPolicy for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewRoutingPolicy {
    pub name: String,
    pub policy_type: PolicyType,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub priority: i32,
    pub source_pattern: Option<String>,
    pub destination_pattern: Option<String>,
    pub constraint_field: Option<String>,
    pub constraint_value: Option<String>,
    pub constraint_operator: Option<String>,
    pub created_by: String,
}

fn default_enabled() -> bool {
    true
}

impl NewRoutingPolicy {
    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::validation("policy name is required"));
        }
        if self.policy_type == PolicyType::Constraint
            && (self.constraint_field.is_none() || self.constraint_value.is_none())
        {
            return Err(ControlError::validation(
                "constraint policies require constraint_field and constraint_value",
            ));
        }
        validate_operator(self.constraint_operator.as_deref())
    }

    pub fn into_policy(self, now: DateTime<Utc>) -> RoutingPolicy {
        RoutingPolicy {
            id: Uuid::new_v4(),
            name: self.name,
            policy_type: self.policy_type,
            enabled: self.enabled,
            priority: self.priority,
            source_pattern: self.source_pattern,
            destination_pattern: self.destination_pattern,
            constraint_field: self.constraint_field,
            constraint_value: self.constraint_value,
            constraint_operator: self.constraint_operator,
            created_by: self.created_by,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Partial update; `None` leaves the field untouched
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoutingPolicyPatch {
    pub name: Option<String>,
    pub enabled: Option<bool>,
    pub priority: Option<i32>,
    pub source_pattern: Option<String>,
    pub destination_pattern: Option<String>,
    pub constraint_field: Option<String>,
    pub constraint_value: Option<String>,
    pub constraint_operator: Option<String>,
}

fn validate_operator(operator: Option<&str>) -> ControlResult<()> {
    match operator {
        Some(op) if ConstraintOperator::parse(op).is_none() => Err(ControlError::validation(
            format!("unsupported constraint operator: {op}"),
        )),
        _ => Ok(()),
    }
}

impl RoutingPolicyPatch {
    pub fn validate(&self) -> ControlResult<()> {
        if self.name.as_deref().is_some_and(|n| n.trim().is_empty()) {
            return Err(ControlError::validation("policy name cannot be blank"));
        }
        validate_operator(self.constraint_operator.as_deref())
    }

    pub fn apply(self, policy: &mut RoutingPolicy, now: DateTime<Utc>) {
        if let Some(name) = self.name {
            policy.name = name;
        }
        if let Some(enabled) = self.enabled {
            policy.enabled = enabled;
        }
        if let Some(priority) = self.priority {
            policy.priority = priority;
        }
        if self.source_pattern.is_some() {
            policy.source_pattern = self.source_pattern;
        }
        if self.destination_pattern.is_some() {
            policy.destination_pattern = self.destination_pattern;
        }
        if self.constraint_field.is_some() {
            policy.constraint_field = self.constraint_field;
        }
        if self.constraint_value.is_some() {
            policy.constraint_value = self.constraint_value;
        }
        if self.constraint_operator.is_some() {
            policy.constraint_operator = self.constraint_operator;
        }
        policy.updated_at = now;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyAuditAction {
    Allowed,
    Violation,
    Override,
}

impl fmt::Display for PolicyAuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => write!(f, "allowed"),
            Self::Violation => write!(f, "violation"),
            Self::Override => write!(f, "override"),
        }
    }
}

impl std::str::FromStr for PolicyAuditAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "allowed" => Ok(Self::Allowed),
            "violation" => Ok(Self::Violation),
            "override" => Ok(Self::Override),
            _ => Err(format!("Invalid policy audit action: {s}")),
        }
    }
}

/// Immutable audit row; `policy_id = None` means a general check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingPolicyAudit {
    pub id: Uuid,
    pub policy_id: Option<Uuid>,
    pub action: PolicyAuditAction,
    pub source_id: String,
    pub destination_id: String,
    pub flow_id: Option<String>,
    pub violation_reason: Option<String>,
    pub overridden_by: Option<String>,
    pub created_at: DateTime<Utc>,
}
