//! Role-scoped read access and price masking.
//!
//! The same request has exactly two external representations: the full one
//! and the price-redacted one. Both come out of [`render`] at the read
//! boundary; internal computation always sees unmasked values.
use super::actor::Actor;
use super::error::WorkflowError;
use super::request::{PurchaseRequest, RequestStatus, TimeStamp, WorkflowStep};
use chrono::Utc;

/// Which requests a viewer may enumerate or read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessScope {
    All,
    Projects(Vec<String>),
    Denied,
}

impl AccessScope {
    /// Computed fresh from the viewer's current role and project
    /// assignments on every call.
    pub fn for_viewer(viewer: &Actor) -> Self {
        if viewer.role.is_unrestricted() {
            AccessScope::All
        } else if viewer.role.is_project_scoped() {
            AccessScope::Projects(viewer.managed_project_ids.clone())
        } else {
            AccessScope::Denied
        }
    }

    pub fn permits(&self, project_id: &str) -> bool {
        match self {
            AccessScope::All => true,
            AccessScope::Projects(projects) => projects.iter().any(|p| p == project_id),
            AccessScope::Denied => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineView {
    pub id: String,
    pub contract_line_item_id: Option<String>,
    pub item_name: String,
    pub specification: String,
    pub unit: String,
    pub quantity: u64,
    pub unit_price: Option<u64>,
    pub line_total: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestView {
    pub id: String,
    pub request_code: String,
    pub project_id: String,
    pub requester_id: String,
    pub status: RequestStatus,
    pub current_step: WorkflowStep,
    pub lines: Vec<LineView>,
    pub total_amount: Option<u64>,
    pub price_hidden: bool,
    pub created_at: TimeStamp<Utc>,
    pub updated_at: TimeStamp<Utc>,
}

/// Project a request for a permitted viewer, masking every price-bearing
/// field for the project-scoped role class.
pub fn render(request: &PurchaseRequest, viewer: &Actor) -> RequestView {
    let hide = viewer.role.is_project_scoped();

    let lines = request
        .lines
        .iter()
        .map(|line| LineView {
            id: line.id.clone(),
            contract_line_item_id: line.contract_line_item_id.clone(),
            item_name: line.item_name.clone(),
            specification: line.specification.clone(),
            unit: line.unit.clone(),
            quantity: line.quantity,
            unit_price: if hide { None } else { line.unit_price },
            line_total: if hide { None } else { line.line_total() },
        })
        .collect();

    RequestView {
        id: request.id.clone(),
        request_code: request.request_code.clone(),
        project_id: request.project_id.clone(),
        requester_id: request.requester_id.clone(),
        status: request.status,
        current_step: request.current_step,
        lines,
        total_amount: if hide { None } else { request.total_amount() },
        price_hidden: hide,
        created_at: request.created_at.clone(),
        updated_at: request.updated_at.clone(),
    }
}

/// Deletion gate: drafts only, by an unrestricted role or the scoped owner
/// of the request's project.
pub fn check_delete(request: &PurchaseRequest, actor: &Actor) -> Result<(), WorkflowError> {
    let permitted = actor.role.is_unrestricted()
        || (actor.role.is_project_scoped() && actor.manages(&request.project_id));
    if !permitted {
        return Err(WorkflowError::Forbidden {
            actor_id: actor.actor_id.clone(),
            action: format!("delete request '{}'", request.id),
        });
    }
    if request.status != RequestStatus::Draft {
        return Err(WorkflowError::NotDeletable {
            request_id: request.id.clone(),
            state: request.status,
        });
    }
    Ok(())
}
