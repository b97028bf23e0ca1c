//! Actor identity and roles, as supplied by the external identity provider.
//!
//! The engine never stores actors; the caller resolves `(actor_id) ->
//! {role, managed_project_ids}` on every call, so a project manager whose
//! assignments change is re-evaluated rather than served from a cache.

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    #[n(0)]
    Administrator,
    #[n(1)]
    GeneralManager,
    #[n(2)]
    DepartmentManager,
    #[n(3)]
    PurchasingAgent,
    #[n(4)]
    Finance,
    #[n(5)]
    ProjectManager,
    #[n(6)]
    FieldCrew,
}

impl Role {
    /// Roles that may read every request and see prices.
    pub fn is_unrestricted(&self) -> bool {
        matches!(
            self,
            Role::Administrator
                | Role::GeneralManager
                | Role::DepartmentManager
                | Role::PurchasingAgent
                | Role::Finance
        )
    }

    /// Roles whose access is limited to the projects they manage.
    pub fn is_project_scoped(&self) -> bool {
        matches!(self, Role::ProjectManager)
    }

    /// Roles that may open a new purchase request.
    pub fn may_create_requests(&self) -> bool {
        matches!(self, Role::ProjectManager | Role::PurchasingAgent)
    }
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub actor_id: String,
    pub role: Role,
    pub managed_project_ids: Vec<String>,
}

impl Actor {
    pub fn new(actor_id: impl Into<String>, role: Role) -> Self {
        Self {
            actor_id: actor_id.into(),
            role,
            managed_project_ids: vec![],
        }
    }

    pub fn with_projects(mut self, project_ids: Vec<String>) -> Self {
        self.managed_project_ids = project_ids;
        self
    }

    pub fn manages(&self, project_id: &str) -> bool {
        self.managed_project_ids.iter().any(|p| p == project_id)
    }
}
