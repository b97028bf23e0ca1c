//! Workflow state machine: actions, the transition table, and role guards.
//!
//! The table below is the single source of truth for which action moves a
//! request from which state to which. Everything not in the table is an
//! illegal transition, reported with the current state and the attempted
//! action.
use super::actor::{Actor, Role};
use super::error::WorkflowError;
use super::request::{PurchaseRequest, RequestStatus, TimeStamp};
use chrono::Utc;

/// Quoted unit price for one request line, carried by [`Action::Quote`].
#[derive(Debug, Clone)]
pub struct LineQuote {
    pub line_id: String,
    pub unit_price: u64,
}

/// A workflow action together with its step-specific payload.
#[derive(Debug, Clone)]
pub enum Action {
    Submit,
    Quote {
        quotes: Vec<LineQuote>,
        delivery_date: Option<TimeStamp<Utc>>,
        notes: Option<String>,
    },
    DeptApprove {
        notes: Option<String>,
    },
    FinalApprove {
        notes: Option<String>,
    },
    Reject {
        notes: Option<String>,
    },
    Complete,
    Cancel,
    Resubmit,
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Submit => ActionKind::Submit,
            Action::Quote { .. } => ActionKind::Quote,
            Action::DeptApprove { .. } => ActionKind::DeptApprove,
            Action::FinalApprove { .. } => ActionKind::FinalApprove,
            Action::Reject { .. } => ActionKind::Reject,
            Action::Complete => ActionKind::Complete,
            Action::Cancel => ActionKind::Cancel,
            Action::Resubmit => ActionKind::Resubmit,
        }
    }

    pub fn notes(&self) -> Option<&str> {
        match self {
            Action::Quote { notes, .. }
            | Action::DeptApprove { notes, .. }
            | Action::FinalApprove { notes, .. }
            | Action::Reject { notes, .. } => notes.as_deref(),
            _ => None,
        }
    }
}

/// Payload-free operation tag, snapshotted into every audit entry.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    #[n(0)]
    Create,
    #[n(1)]
    Update,
    #[n(2)]
    Submit,
    #[n(3)]
    Quote,
    #[n(4)]
    DeptApprove,
    #[n(5)]
    FinalApprove,
    #[n(6)]
    Reject,
    #[n(7)]
    Complete,
    #[n(8)]
    Cancel,
    #[n(9)]
    Resubmit,
}

impl ActionKind {
    /// Every action dispatchable through `ProcurementService::transition`.
    pub const TRANSITIONS: [ActionKind; 8] = [
        ActionKind::Submit,
        ActionKind::Quote,
        ActionKind::DeptApprove,
        ActionKind::FinalApprove,
        ActionKind::Reject,
        ActionKind::Complete,
        ActionKind::Cancel,
        ActionKind::Resubmit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Update => "update",
            ActionKind::Submit => "submit",
            ActionKind::Quote => "quote",
            ActionKind::DeptApprove => "dept-approve",
            ActionKind::FinalApprove => "final-approve",
            ActionKind::Reject => "reject",
            ActionKind::Complete => "complete",
            ActionKind::Cancel => "cancel",
            ActionKind::Resubmit => "resubmit",
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

const TRANSITION_TABLE: &[(RequestStatus, ActionKind, RequestStatus)] = &[
    (RequestStatus::Draft, ActionKind::Submit, RequestStatus::Submitted),
    (RequestStatus::Draft, ActionKind::Cancel, RequestStatus::Cancelled),
    (RequestStatus::Submitted, ActionKind::Quote, RequestStatus::PriceQuoted),
    (RequestStatus::Submitted, ActionKind::Reject, RequestStatus::Rejected),
    (RequestStatus::PriceQuoted, ActionKind::DeptApprove, RequestStatus::DeptApproved),
    (RequestStatus::PriceQuoted, ActionKind::Reject, RequestStatus::Rejected),
    (RequestStatus::DeptApproved, ActionKind::FinalApprove, RequestStatus::FinalApproved),
    (RequestStatus::DeptApproved, ActionKind::Reject, RequestStatus::Rejected),
    (RequestStatus::FinalApproved, ActionKind::Complete, RequestStatus::Completed),
    (RequestStatus::Rejected, ActionKind::Resubmit, RequestStatus::Draft),
];

/// Look up the table row for `(from, action)`.
pub fn target_state(from: RequestStatus, action: ActionKind) -> Option<RequestStatus> {
    TRANSITION_TABLE
        .iter()
        .find(|(state, kind, _)| *state == from && *kind == action)
        .map(|(_, _, to)| *to)
}

/// Verify that `actor` may perform `action` on `request` in its current
/// state, returning the resulting state on success.
pub fn check_transition(
    request: &PurchaseRequest,
    actor: &Actor,
    action: ActionKind,
) -> Result<RequestStatus, WorkflowError> {
    let Some(target) = target_state(request.status, action) else {
        return Err(WorkflowError::IllegalTransition {
            state: request.status,
            action,
        });
    };

    match action {
        ActionKind::Submit | ActionKind::Cancel | ActionKind::Resubmit => {
            ensure_owner(request, actor, action)?;
        }
        ActionKind::Quote => ensure_role(request, actor, action, &[Role::PurchasingAgent])?,
        ActionKind::DeptApprove => {
            ensure_role(request, actor, action, &[Role::DepartmentManager])?;
        }
        ActionKind::FinalApprove => {
            ensure_role(request, actor, action, &[Role::GeneralManager])?;
        }
        // The system completes through the administrator role.
        ActionKind::Complete => {
            ensure_role(
                request,
                actor,
                action,
                &[Role::PurchasingAgent, Role::Administrator],
            )?;
        }
        // The rejecting reviewer depends on where the request sits.
        ActionKind::Reject => {
            let reviewer = match request.status {
                RequestStatus::Submitted => Role::PurchasingAgent,
                RequestStatus::PriceQuoted => Role::DepartmentManager,
                RequestStatus::DeptApproved => Role::GeneralManager,
                _ => {
                    return Err(WorkflowError::IllegalTransition {
                        state: request.status,
                        action,
                    });
                }
            };
            ensure_role(request, actor, action, &[reviewer])?;
        }
        ActionKind::Create | ActionKind::Update => {
            return Err(WorkflowError::IllegalTransition {
                state: request.status,
                action,
            });
        }
    }

    Ok(target)
}

/// The owning requester, within project scope for project-scoped roles.
pub fn ensure_owner(
    request: &PurchaseRequest,
    actor: &Actor,
    action: ActionKind,
) -> Result<(), WorkflowError> {
    if actor.actor_id != request.requester_id {
        return Err(forbidden(request, actor, action));
    }
    if actor.role.is_project_scoped() && !actor.manages(&request.project_id) {
        return Err(forbidden(request, actor, action));
    }
    Ok(())
}

fn ensure_role(
    request: &PurchaseRequest,
    actor: &Actor,
    action: ActionKind,
    allowed: &[Role],
) -> Result<(), WorkflowError> {
    if allowed.contains(&actor.role) {
        Ok(())
    } else {
        Err(forbidden(request, actor, action))
    }
}

fn forbidden(request: &PurchaseRequest, actor: &Actor, action: ActionKind) -> WorkflowError {
    WorkflowError::Forbidden {
        actor_id: actor.actor_id.clone(),
        action: format!("{action} request '{}'", request.id),
    }
}
