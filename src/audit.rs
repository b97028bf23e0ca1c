//! Append-only workflow log.
//!
//! Entries are written in the same atomic unit as the transition they
//! record, carry a snapshot of the operator's role at that moment, and are
//! never mutated or deleted afterwards; they outlive even a deleted draft.
use super::actor::{Actor, Role};
use super::ledger::QuantityAdvisory;
use super::request::{RequestStatus, TimeStamp};
use super::utils;
use super::workflow::ActionKind;
use chrono::Utc;

/// Structured payload attached to the entry for steps that carry one.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub enum OperationData {
    #[n(0)]
    Quote {
        #[n(0)]
        total_amount: u64,
        #[n(1)]
        delivery_date: Option<TimeStamp<Utc>>,
    },
    #[n(1)]
    Review {
        #[n(0)]
        approved: bool,
    },
    #[n(2)]
    Advisories {
        #[n(0)]
        exceeded: Vec<QuantityAdvisory>,
    },
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct WorkflowLogEntry {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_id: String,
    /// `None` only for the creation entry.
    #[n(2)]
    pub from_step: Option<RequestStatus>,
    #[n(3)]
    pub to_step: RequestStatus,
    #[n(4)]
    pub operation: ActionKind,
    #[n(5)]
    pub operator_id: String,
    /// Role held at the moment of the operation; later role changes must
    /// not rewrite history.
    #[n(6)]
    pub operator_role: Role,
    #[n(7)]
    pub notes: Option<String>,
    #[n(8)]
    pub operation_data: Option<OperationData>,
    #[n(9)]
    pub created_at: TimeStamp<Utc>,
    /// Digest of the preceding entry on the same request, `None` for the
    /// first. Chains the trail: rewriting any entry breaks every digest
    /// after it.
    #[n(10)]
    pub prev_digest: Option<String>,
}

impl WorkflowLogEntry {
    pub fn new(
        request_id: String,
        from_step: Option<RequestStatus>,
        to_step: RequestStatus,
        operation: ActionKind,
        actor: &Actor,
        notes: Option<String>,
        operation_data: Option<OperationData>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            id: utils::new_uuid_to_bech32("log_")?,
            request_id,
            from_step,
            to_step,
            operation,
            operator_id: actor.actor_id.clone(),
            operator_role: actor.role,
            notes,
            operation_data,
            created_at: TimeStamp::new(),
            prev_digest: None,
        })
    }

    /// Tamper-evidence digest over the CBOR encoding of the entry.
    pub fn digest(&self) -> anyhow::Result<String> {
        let cbor = minicbor::to_vec(self)?;
        Ok(sha256::digest(&cbor))
    }
}
