use chrono::Utc;
use opentelemetry::KeyValue;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::patterns::matches_pattern;
use crate::metrics;
use crate::models::{
    ConstraintOperator, PolicyAuditAction, PolicyType, RoutingPolicy, RoutingPolicyAudit,
};
use crate::store::RoutingPolicyStore;

/// A proposed sender→receiver connection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionIntent {
    pub sender_id: String,
    pub receiver_id: String,
    pub flow_id: Option<String>,
    pub flow_label: Option<String>,
    pub sender_label: Option<String>,
}

impl ConnectionIntent {
    pub fn new(sender_id: impl Into<String>, receiver_id: impl Into<String>) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            ..Default::default()
        }
    }

    pub fn with_flow(mut self, flow_id: impl Into<String>, flow_label: Option<String>) -> Self {
        self.flow_id = Some(flow_id.into());
        self.flow_label = flow_label;
        self
    }

    pub fn with_sender_label(mut self, sender_label: impl Into<String>) -> Self {
        self.sender_label = Some(sender_label.into());
        self
    }

    fn field(&self, name: &str) -> Option<&str> {
        match name.trim() {
            "flow_label" | "label" => self.flow_label.as_deref(),
            "sender_label" => self.sender_label.as_deref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyViolation {
    pub policy_id: Uuid,
    pub policy_name: String,
    pub policy_type: PolicyType,
    pub reason: String,
}

/// Evaluates intents against enabled policies, highest priority first
#[derive(Clone)]
pub struct RoutingPolicyEngine {
    store: Arc<dyn RoutingPolicyStore>,
}

impl std::fmt::Debug for RoutingPolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RoutingPolicyEngine").finish_non_exhaustive()
    }
}

impl RoutingPolicyEngine {
    pub fn new(store: Arc<dyn RoutingPolicyStore>) -> Self {
        Self { store }
    }

    /// Check one intent and write one audit row for it.
    ///
    /// A policy store that cannot be read is treated as holding no policies.
    #[instrument(skip(self, intent), fields(sender_id = %intent.sender_id, receiver_id = %intent.receiver_id))]
    pub async fn check_connection(&self, intent: &ConnectionIntent) -> Vec<PolicyViolation> {
        let policies = match self.store.list_enabled_policies().await {
            Ok(policies) => policies,
            Err(e) => {
                warn!(error = %e, "Routing policies unavailable, allowing connection");
                Vec::new()
            }
        };

        let violations = evaluate(&policies, intent);
        metrics::policy_checks_total().add(1, &[]);
        if !violations.is_empty() {
            metrics::policy_violations_total().add(violations.len() as u64, &[]);
        }

        let audit = match violations.first() {
            None => audit_row(intent, PolicyAuditAction::Allowed, None, None, None),
            Some(first) => audit_row(
                intent,
                PolicyAuditAction::Violation,
                Some(first.policy_id),
                Some(first.reason.clone()),
                None,
            ),
        };
        if let Err(e) = self.store.append_policy_audit(audit).await {
            warn!(error = %e, "Failed to write routing policy audit row");
        }

        debug!(violations = violations.len(), "Routing policy check complete");
        violations
    }

    /// One `override` audit row per overridden policy
    #[instrument(skip(self, violations, intent), fields(overrides = violations.len()))]
    pub async fn record_overrides(
        &self,
        violations: &[PolicyViolation],
        intent: &ConnectionIntent,
        actor: &str,
    ) {
        for violation in violations {
            let audit = audit_row(
                intent,
                PolicyAuditAction::Override,
                Some(violation.policy_id),
                Some(violation.reason.clone()),
                Some(actor.to_string()),
            );
            if let Err(e) = self.store.append_policy_audit(audit).await {
                warn!(policy_id = %violation.policy_id, error = %e, "Failed to write override audit row");
            }
        }
        metrics::policy_overrides_total().add(
            violations.len() as u64,
            &[KeyValue::new("actor", actor.to_string())],
        );
    }
}

/// Pure evaluation; `policies` must already be enabled and priority ordered
pub fn evaluate(policies: &[RoutingPolicy], intent: &ConnectionIntent) -> Vec<PolicyViolation> {
    policies
        .iter()
        .filter(|policy| policy.enabled)
        .filter_map(|policy| violation_for(policy, intent))
        .collect()
}

fn violation_for(policy: &RoutingPolicy, intent: &ConnectionIntent) -> Option<PolicyViolation> {
    let reason = match policy.policy_type {
        PolicyType::ForbiddenPair => {
            let hit = matches_pattern(policy.source_pattern.as_deref(), &intent.sender_id)
                && matches_pattern(policy.destination_pattern.as_deref(), &intent.receiver_id);
            if !hit {
                return None;
            }
            format!(
                "connection {} -> {} is forbidden by policy '{}'",
                intent.sender_id, intent.receiver_id, policy.name
            )
        }
        PolicyType::Constraint => {
            let field = policy.constraint_field.as_deref()?;
            let expected = policy.constraint_value.as_deref()?;
            let actual = intent.field(field)?;
            let operator = ConstraintOperator::parse_lenient(policy.constraint_operator.as_deref());
            if !operator.matches(actual, expected) {
                return None;
            }
            format!(
                "{field} '{actual}' violates constraint of policy '{}'",
                policy.name
            )
        }
        // Accepted but not enforced on this path
        PolicyType::AllowedPair | PolicyType::PathRequirement => return None,
    };

    Some(PolicyViolation {
        policy_id: policy.id,
        policy_name: policy.name.clone(),
        policy_type: policy.policy_type,
        reason,
    })
}

fn audit_row(
    intent: &ConnectionIntent,
    action: PolicyAuditAction,
    policy_id: Option<Uuid>,
    violation_reason: Option<String>,
    overridden_by: Option<String>,
) -> RoutingPolicyAudit {
    RoutingPolicyAudit {
        id: Uuid::new_v4(),
        policy_id,
        action,
        source_id: intent.sender_id.clone(),
        destination_id: intent.receiver_id.clone(),
        flow_id: intent.flow_id.clone(),
        violation_reason,
        overridden_by,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ControlError, ControlResult};
    use crate::models::{NewRoutingPolicy, RoutingPolicyPatch};
    use crate::store::MemoryStore;
    use async_trait::async_trait;

    fn forbidden(name: &str, source: &str, destination: &str, priority: i32) -> NewRoutingPolicy {
        NewRoutingPolicy {
            name: name.to_string(),
            policy_type: PolicyType::ForbiddenPair,
            enabled: true,
            priority,
            source_pattern: Some(source.to_string()),
            destination_pattern: Some(destination.to_string()),
            constraint_field: None,
            constraint_value: None,
            constraint_operator: None,
            created_by: "ops".to_string(),
        }
    }

    fn constraint(field: &str, operator: Option<&str>, value: &str) -> NewRoutingPolicy {
        NewRoutingPolicy {
            name: format!("{field} constraint"),
            policy_type: PolicyType::Constraint,
            enabled: true,
            priority: 0,
            source_pattern: None,
            destination_pattern: None,
            constraint_field: Some(field.to_string()),
            constraint_value: Some(value.to_string()),
            constraint_operator: operator.map(str::to_string),
            created_by: "ops".to_string(),
        }
    }

    #[tokio::test]
    async fn test_forbidden_pair_gate() {
        let store = Arc::new(MemoryStore::new());
        store
            .create_policy(forbidden("no sender ns", "sender:*", "*", 10))
            .await
            .unwrap();
        let engine = RoutingPolicyEngine::new(store.clone());

        let blocked = engine
            .check_connection(&ConnectionIntent::new("sender:1", "rx-anything"))
            .await;
        assert_eq!(blocked.len(), 1);
        assert_eq!(blocked[0].policy_type, PolicyType::ForbiddenPair);

        let allowed = engine
            .check_connection(&ConnectionIntent::new("other:1", "rx-anything"))
            .await;
        assert!(allowed.is_empty());

        let audit = store.list_policy_audit(10).await.unwrap();
        assert_eq!(audit.len(), 2);
        assert_eq!(audit[0].action, PolicyAuditAction::Allowed);
        assert_eq!(audit[0].policy_id, None);
        assert_eq!(audit[1].action, PolicyAuditAction::Violation);
        assert_eq!(audit[1].policy_id, Some(blocked[0].policy_id));
    }

    #[tokio::test]
    async fn test_disabled_policies_are_ignored() {
        let store = Arc::new(MemoryStore::new());
        let policy = store
            .create_policy(forbidden("all", "*", "*", 0))
            .await
            .unwrap();
        store
            .update_policy(
                policy.id,
                RoutingPolicyPatch {
                    enabled: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let engine = RoutingPolicyEngine::new(store);
        assert!(engine
            .check_connection(&ConnectionIntent::new("tx", "rx"))
            .await
            .is_empty());
    }

    #[tokio::test]
    async fn test_violations_follow_priority_and_first_is_audited() {
        let store = Arc::new(MemoryStore::new());
        store.create_policy(forbidden("low", "*", "*", 1)).await.unwrap();
        store.create_policy(forbidden("high", "*", "*", 50)).await.unwrap();
        let engine = RoutingPolicyEngine::new(store.clone());

        let violations = engine
            .check_connection(&ConnectionIntent::new("tx", "rx"))
            .await;
        let names: Vec<_> = violations.iter().map(|v| v.policy_name.as_str()).collect();
        assert_eq!(names, vec!["high", "low"]);

        let audit = store.list_policy_audit(1).await.unwrap();
        assert_eq!(audit[0].policy_id, Some(violations[0].policy_id));
    }

    #[test]
    fn test_constraint_fields_and_operators() {
        let now = Utc::now();
        let intent = ConnectionIntent::new("tx", "rx")
            .with_flow("flow-1", Some("TEST Bars".to_string()))
            .with_sender_label("Camera 4");

        let contains = constraint("flow_label", Some("contains"), "test").into_policy(now);
        assert_eq!(evaluate(&[contains], &intent).len(), 1);

        let label_alias = constraint("label", Some("starts_with"), "test").into_policy(now);
        assert_eq!(evaluate(&[label_alias], &intent).len(), 1);

        let sender = constraint("sender_label", Some("ends_with"), "4").into_policy(now);
        assert_eq!(evaluate(&[sender], &intent).len(), 1);

        // unknown operator compares exactly
        let mut fallback = constraint("flow_label", None, "test bars").into_policy(now);
        fallback.constraint_operator = Some("regex".to_string());
        assert!(evaluate(&[fallback], &intent).is_empty());

        let unknown_field = constraint("device_label", Some("contains"), "x").into_policy(now);
        assert!(evaluate(&[unknown_field], &intent).is_empty());
    }

    #[test]
    fn test_allowed_pair_not_enforced() {
        let mut policy = forbidden("allow", "*", "*", 0).into_policy(Utc::now());
        policy.policy_type = PolicyType::AllowedPair;
        assert!(evaluate(&[policy], &ConnectionIntent::new("tx", "rx")).is_empty());
    }

    #[tokio::test]
    async fn test_override_rows_carry_actor() {
        let store = Arc::new(MemoryStore::new());
        store.create_policy(forbidden("a", "*", "*", 2)).await.unwrap();
        store.create_policy(forbidden("b", "*", "*", 1)).await.unwrap();
        let engine = RoutingPolicyEngine::new(store.clone());
        let intent = ConnectionIntent::new("tx", "rx");

        let violations = engine.check_connection(&intent).await;
        engine.record_overrides(&violations, &intent, "carol").await;

        let overrides: Vec<_> = store
            .list_policy_audit(10)
            .await
            .unwrap()
            .into_iter()
            .filter(|row| row.action == PolicyAuditAction::Override)
            .collect();
        assert_eq!(overrides.len(), 2);
        assert!(overrides
            .iter()
            .all(|row| row.overridden_by.as_deref() == Some("carol")));
    }

    struct UnavailableStore;

    #[async_trait]
    impl RoutingPolicyStore for UnavailableStore {
        async fn create_policy(&self, _: NewRoutingPolicy) -> ControlResult<RoutingPolicy> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn get_policy(&self, _: Uuid) -> ControlResult<Option<RoutingPolicy>> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn list_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn list_enabled_policies(&self) -> ControlResult<Vec<RoutingPolicy>> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn update_policy(
            &self,
            _: Uuid,
            _: RoutingPolicyPatch,
        ) -> ControlResult<Option<RoutingPolicy>> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn delete_policy(&self, _: Uuid) -> ControlResult<bool> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn append_policy_audit(&self, _: RoutingPolicyAudit) -> ControlResult<()> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
        async fn list_policy_audit(&self, _: usize) -> ControlResult<Vec<RoutingPolicyAudit>> {
            Err(ControlError::DatabaseError("down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_unreadable_store_fails_open() {
        let engine = RoutingPolicyEngine::new(Arc::new(UnavailableStore));
        let violations = engine
            .check_connection(&ConnectionIntent::new("sender:1", "rx"))
            .await;
        assert!(violations.is_empty());
    }
}
