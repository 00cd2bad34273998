use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::error::ControlResult;
use crate::models::{Flow, NmosSender};
use crate::registry::{FlowLookup, NmosRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinCheck {
    /// Flows sharing a multicast group and port
    CollisionCheck,
    /// Local flows versus senders discovered in the NMOS registry
    NmosCheck,
}

impl BuiltinCheck {
    pub fn from_job_id(job_id: &str) -> Option<Self> {
        match job_id {
            "collision_check" => Some(Self::CollisionCheck),
            "nmos_check" => Some(Self::NmosCheck),
            _ => None,
        }
    }

    /// Checker result kind written for this check
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CollisionCheck => "collisions",
            Self::NmosCheck => "nmos_check",
        }
    }
}

#[derive(Clone)]
pub struct AutomationChecks {
    flows: Arc<dyn FlowLookup>,
    registry: Arc<dyn NmosRegistry>,
}

impl std::fmt::Debug for AutomationChecks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AutomationChecks").finish_non_exhaustive()
    }
}

impl AutomationChecks {
    pub fn new(flows: Arc<dyn FlowLookup>, registry: Arc<dyn NmosRegistry>) -> Self {
        Self { flows, registry }
    }

    pub async fn run(&self, check: BuiltinCheck) -> ControlResult<Value> {
        let flows = self.flows.list_flows().await?;
        match check {
            BuiltinCheck::CollisionCheck => Ok(detect_collisions(&flows)),
            BuiltinCheck::NmosCheck => {
                let senders = self.registry.list_senders().await?;
                Ok(nmos_consistency(&flows, &senders))
            }
        }
    }
}

/// Group flows by `(multicast_ip, port)` and report every group with more than one flow
pub fn detect_collisions(flows: &[Flow]) -> Value {
    let mut groups: BTreeMap<(&str, u16), Vec<&str>> = BTreeMap::new();
    for flow in flows {
        let ip = flow.multicast_ip.trim();
        if ip.is_empty() {
            continue;
        }
        groups.entry((ip, flow.port)).or_default().push(&flow.flow_id);
    }

    let collisions: Vec<Value> = groups
        .into_iter()
        .filter(|(_, flow_ids)| flow_ids.len() > 1)
        .map(|((multicast_ip, port), flow_ids)| {
            json!({
                "multicast_ip": multicast_ip,
                "port": port,
                "flow_ids": flow_ids,
            })
        })
        .collect();

    json!({
        "total_flows": flows.len(),
        "collision_count": collisions.len(),
        "collisions": collisions,
    })
}

/// Cross-check locally known flows against discovered senders
pub fn nmos_consistency(flows: &[Flow], senders: &[NmosSender]) -> Value {
    let local_flow_ids: HashSet<&str> = flows.iter().map(|f| f.flow_id.as_str()).collect();
    let sender_ids: HashSet<&str> = senders.iter().map(|s| s.id.as_str()).collect();
    let advertised_flow_ids: HashSet<&str> =
        senders.iter().filter_map(|s| s.flow_id.as_deref()).collect();

    let flows_without_sender: Vec<&str> = flows
        .iter()
        .filter(|f| !advertised_flow_ids.contains(f.flow_id.as_str()))
        .map(|f| f.flow_id.as_str())
        .collect();

    let missing_senders: Vec<Value> = flows
        .iter()
        .filter_map(|f| {
            let sender_id = f.sender_id.as_deref()?;
            (!sender_ids.contains(sender_id))
                .then(|| json!({"flow_id": f.flow_id, "sender_id": sender_id}))
        })
        .collect();

    let senders_without_flow: Vec<&str> = senders
        .iter()
        .filter(|s| {
            s.flow_id
                .as_deref()
                .is_some_and(|flow_id| !local_flow_ids.contains(flow_id))
        })
        .map(|s| s.id.as_str())
        .collect();

    let consistent =
        flows_without_sender.is_empty() && missing_senders.is_empty() && senders_without_flow.is_empty();

    json!({
        "local_flows": flows.len(),
        "nmos_senders": senders.len(),
        "consistent": consistent,
        "flows_without_sender": flows_without_sender,
        "missing_senders": missing_senders,
        "senders_without_flow": senders_without_flow,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(id: &str, ip: &str, port: u16, sender_id: Option<&str>) -> Flow {
        Flow {
            flow_id: id.to_string(),
            display_name: id.to_uppercase(),
            multicast_ip: ip.to_string(),
            source_ip: "10.0.0.1".to_string(),
            port,
            sender_id: sender_id.map(str::to_string),
        }
    }

    #[test]
    fn test_collisions_grouped_by_group_and_port() {
        let flows = vec![
            flow("f1", "239.0.0.1", 5004, None),
            flow("f2", "239.0.0.1", 5004, None),
            flow("f3", "239.0.0.1", 5006, None),
            flow("f4", "", 5004, None),
            flow("f5", "", 5004, None),
        ];
        let result = detect_collisions(&flows);
        assert_eq!(result["collision_count"], 1);
        assert_eq!(result["collisions"][0]["flow_ids"], json!(["f1", "f2"]));
        assert_eq!(result["total_flows"], 5);
    }

    #[test]
    fn test_nmos_consistency_report() {
        let flows = vec![
            flow("f1", "239.0.0.1", 5004, Some("tx-1")),
            flow("f2", "239.0.0.2", 5004, Some("tx-gone")),
        ];
        let senders = vec![
            NmosSender {
                id: "tx-1".to_string(),
                flow_id: Some("f1".to_string()),
                label: "Cam 1".to_string(),
            },
            NmosSender {
                id: "tx-9".to_string(),
                flow_id: Some("f-remote".to_string()),
                label: "Remote".to_string(),
            },
        ];

        let result = nmos_consistency(&flows, &senders);
        assert_eq!(result["consistent"], false);
        assert_eq!(result["flows_without_sender"], json!(["f2"]));
        assert_eq!(result["missing_senders"][0]["sender_id"], "tx-gone");
        assert_eq!(result["senders_without_flow"], json!(["tx-9"]));
    }

    #[test]
    fn test_builtin_selection() {
        assert_eq!(
            BuiltinCheck::from_job_id("collision_check").map(|c| c.kind()),
            Some("collisions")
        );
        assert_eq!(BuiltinCheck::from_job_id("nmos_check"), Some(BuiltinCheck::NmosCheck));
        assert_eq!(BuiltinCheck::from_job_id("disk_usage"), None);
    }
}
