//! # Data Models
//!
//! Plain data types shared by the stores, the engines and the runners.

pub mod actor;
pub mod automation_job;
pub mod flow;
pub mod maintenance_window;
pub mod playbook;
pub mod receiver_connection;
pub mod routing_policy;
pub mod scheduled_activation;

pub use actor::Actor;
pub use automation_job::{AutomationJob, CheckerResult, JobRunRecord, ScheduleType};
pub use flow::{Flow, MediaFormat, NmosReceiver, NmosSender};
pub use maintenance_window::{MaintenanceWindow, NewMaintenanceWindow};
pub use playbook::{
    NewPlaybook, NewScheduledPlaybook, Playbook, PlaybookExecution, ScheduledPlaybookExecution,
    StepOutcome, ADMIN_ROLE,
};
pub use receiver_connection::{
    ConnectionAction, ConnectionKey, ConnectionRole, ConnectionState, ReceiverConnection,
    ReceiverConnectionHistory,
};
pub use routing_policy::{
    ConstraintOperator, NewRoutingPolicy, PolicyAuditAction, PolicyType, RoutingPolicy,
    RoutingPolicyAudit, RoutingPolicyPatch,
};
pub use scheduled_activation::{ActivationMode, NewScheduledActivation, ScheduledActivation};
