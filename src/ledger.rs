//! Contract ledger collaborator and quantity reconciliation.
//!
//! The ledger holds the signed bill of materials per project; the engine
//! reads it and never writes it. Reconciliation deliberately recomputes the
//! committed sum from live request rows on every check instead of keeping a
//! running counter.
use super::request::PurchaseRequest;
use super::utils;
use sled::Db;
use std::sync::Arc;

/// One row of a project's signed bill of materials.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct ContractLineItem {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub project_id: String,
    #[n(2)]
    pub item_name: String,
    #[n(3)]
    pub specification: String,
    #[n(4)]
    pub unit: String,
    #[n(5)]
    pub contracted_quantity: u64,
    #[n(6)]
    pub unit_price: u64,
}

/// Read/seed access to the contract ledger. Seeding belongs to the
/// surrounding import layer; the workflow engine only reads.
pub struct ContractLedger {
    instance: Arc<Db>,
}

impl ContractLedger {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    pub fn insert_line(&self, line: &ContractLineItem) -> anyhow::Result<()> {
        self.instance
            .insert(utils::contract_key(&line.id), minicbor::to_vec(line)?)?;
        Ok(())
    }

    pub fn line(&self, contract_line_item_id: &str) -> anyhow::Result<Option<ContractLineItem>> {
        match self.instance.get(utils::contract_key(contract_line_item_id))? {
            Some(raw) => Ok(Some(minicbor::decode(raw.as_ref())?)),
            None => Ok(None),
        }
    }
}

/// Balance snapshot for one contract line at check time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuantityCheck {
    pub contracted: u64,
    pub committed: u64,
}

impl QuantityCheck {
    pub fn remaining(&self) -> u64 {
        self.contracted.saturating_sub(self.committed)
    }

    pub fn admits(&self, requested: u64) -> bool {
        requested <= self.remaining()
    }
}

/// Result of the non-blocking advisory check run at submit time.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct QuantityAdvisory {
    #[n(0)]
    pub contract_line_item_id: String,
    #[n(1)]
    pub item_name: String,
    #[n(2)]
    pub contracted: u64,
    #[n(3)]
    pub committed: u64,
    #[n(4)]
    pub remaining: u64,
    #[n(5)]
    pub requested: u64,
}

/// Sum of quantities already committed against `contract_line_item_id`
/// across all requests in committing states, excluding the candidate
/// request itself (so re-evaluating it never double counts).
pub fn committed_quantity<'a, I>(
    requests: I,
    contract_line_item_id: &str,
    excluding_request_id: &str,
) -> u64
where
    I: IntoIterator<Item = &'a PurchaseRequest>,
{
    requests
        .into_iter()
        .filter(|request| request.id != excluding_request_id)
        .filter(|request| request.status.is_committing())
        .flat_map(|request| request.lines.iter())
        .filter(|line| line.contract_line_item_id.as_deref() == Some(contract_line_item_id))
        .map(|line| line.quantity)
        .fold(0, u64::saturating_add)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{PurchaseRequestLine, RequestStatus, TimeStamp};

    fn request(id: &str, status: RequestStatus, contract_id: &str, quantity: u64) -> PurchaseRequest {
        PurchaseRequest {
            id: id.to_string(),
            request_code: "PR-20250819-001".into(),
            project_id: "proj_a".into(),
            requester_id: "user_a".into(),
            status,
            current_step: status.step(),
            lines: vec![PurchaseRequestLine {
                id: format!("line_{id}"),
                contract_line_item_id: Some(contract_id.to_string()),
                item_name: "cement".into(),
                specification: "P.O 42.5".into(),
                unit: "t".into(),
                quantity,
                unit_price: None,
            }],
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    #[test]
    fn only_committing_states_count() {
        let requests = vec![
            request("pr_a", RequestStatus::DeptApproved, "cli_x", 60),
            request("pr_b", RequestStatus::Submitted, "cli_x", 30),
            request("pr_c", RequestStatus::Rejected, "cli_x", 25),
            request("pr_d", RequestStatus::Completed, "cli_x", 10),
        ];

        assert_eq!(committed_quantity(&requests, "cli_x", "pr_z"), 70);
    }

    #[test]
    fn candidate_request_is_excluded() {
        let requests = vec![
            request("pr_a", RequestStatus::FinalApproved, "cli_x", 60),
            request("pr_b", RequestStatus::FinalApproved, "cli_x", 40),
        ];

        assert_eq!(committed_quantity(&requests, "cli_x", "pr_a"), 40);
    }

    #[test]
    fn other_contract_lines_do_not_count() {
        let requests = vec![request("pr_a", RequestStatus::Completed, "cli_other", 60)];

        assert_eq!(committed_quantity(&requests, "cli_x", "pr_z"), 0);
    }

    #[test]
    fn remaining_saturates_at_zero() {
        let check = QuantityCheck {
            contracted: 50,
            committed: 80,
        };
        assert_eq!(check.remaining(), 0);
        assert!(!check.admits(1));
        assert!(check.admits(0));
    }
}
