//! Service layer API for purchase request workflow operations.
//!
//! Every mutation runs inside a `sled` transaction so that the quantity
//! reconciler's read-sum-compare and the resulting state write are one
//! atomic unit: a concurrent second committer re-reads a committed total
//! that already includes the first commit, and simply fails the check.
use super::actor::Actor;
use super::audit::{OperationData, WorkflowLogEntry};
use super::error::{ValidationError, WorkflowError};
use super::ledger::{self, ContractLineItem, QuantityAdvisory, QuantityCheck};
use super::request::{self, NewLine, PurchaseRequest, RequestStatus, TimeStamp};
use super::utils;
use super::visibility::{self, AccessScope, RequestView};
use super::workflow::{self, Action, ActionKind};
use chrono::Utc;
use sled::Db;
use sled::transaction::{
    ConflictableTransactionError, ConflictableTransactionResult, TransactionError,
    TransactionalTree,
};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

pub struct ProcurementService {
    instance: Arc<Db>,
}

/// Result of a successful transition. `advisories` is non-empty only when a
/// submit-time soft check found contract lines already over their balance.
#[derive(Debug)]
pub struct TransitionOutcome {
    pub request: PurchaseRequest,
    pub advisories: Vec<QuantityAdvisory>,
}

type TxnResult<T> = ConflictableTransactionResult<T, anyhow::Error>;

fn abort<T>(err: impl Into<anyhow::Error>) -> TxnResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}

fn unwrap_txn<T>(result: sled::transaction::TransactionResult<T, anyhow::Error>) -> anyhow::Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(TransactionError::Abort(err)) => Err(err),
        Err(TransactionError::Storage(err)) => Err(err.into()),
    }
}

fn decode_value<T>(raw: &sled::IVec) -> TxnResult<T>
where
    T: for<'b> minicbor::Decode<'b, ()>,
{
    minicbor::decode(raw.as_ref()).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn encode_value<T: minicbor::Encode<()>>(value: &T) -> TxnResult<Vec<u8>> {
    minicbor::to_vec(value).map_err(|e| ConflictableTransactionError::Abort(e.into()))
}

fn load_request_txn(tx: &TransactionalTree, request_id: &str) -> TxnResult<PurchaseRequest> {
    match tx.get(utils::request_key(request_id))? {
        Some(raw) => decode_value(&raw),
        None => abort(WorkflowError::NotFound(request_id.to_string())),
    }
}

fn append_log_txn(tx: &TransactionalTree, mut entry: WorkflowLogEntry) -> TxnResult<()> {
    let key = utils::audit_key(&entry.request_id);
    let mut entries: Vec<WorkflowLogEntry> = match tx.get(&key)? {
        Some(raw) => decode_value(&raw)?,
        None => Vec::new(),
    };
    // each entry seals its predecessor's digest, chaining the trail
    entry.prev_digest = match entries.last() {
        Some(previous) => match previous.digest() {
            Ok(digest) => Some(digest),
            Err(err) => return abort(err),
        },
        None => None,
    };
    entries.push(entry);
    tx.insert(key, encode_value(&entries)?)?;
    Ok(())
}

fn index_request_txn(
    tx: &TransactionalTree,
    contract_line_item_id: &str,
    request_id: &str,
) -> TxnResult<()> {
    let key = utils::line_index_key(contract_line_item_id);
    let mut ids: Vec<String> = match tx.get(&key)? {
        Some(raw) => decode_value(&raw)?,
        None => Vec::new(),
    };
    if !ids.iter().any(|id| id == request_id) {
        ids.push(request_id.to_string());
        tx.insert(key, encode_value(&ids)?)?;
    }
    Ok(())
}

fn unindex_request_txn(
    tx: &TransactionalTree,
    contract_line_item_id: &str,
    request_id: &str,
) -> TxnResult<()> {
    let key = utils::line_index_key(contract_line_item_id);
    if let Some(raw) = tx.get(&key)? {
        let mut ids: Vec<String> = decode_value(&raw)?;
        ids.retain(|id| id != request_id);
        tx.insert(key, encode_value(&ids)?)?;
    }
    Ok(())
}

/// Resolve the contract lines referenced by a set of draft lines.
fn resolve_contracts_txn(
    tx: &TransactionalTree,
    lines: &[NewLine],
) -> TxnResult<HashMap<String, ContractLineItem>> {
    let mut contracts = HashMap::new();
    for line in lines {
        let Some(contract_id) = line.contract_line_item_id.as_deref() else {
            continue;
        };
        if contracts.contains_key(contract_id) {
            continue;
        }
        match tx.get(utils::contract_key(contract_id))? {
            Some(raw) => {
                contracts.insert(contract_id.to_string(), decode_value(&raw)?);
            }
            None => {
                return abort(WorkflowError::from(ValidationError::UnknownContractLine(
                    contract_id.to_string(),
                )));
            }
        }
    }
    Ok(contracts)
}

/// Re-check the request's catalog lines against the contract ledger. Lines
/// on the same contract item are checked as one aggregate quantity. With
/// `enforce` the first violation aborts the transaction; otherwise each
/// violation becomes an advisory.
fn reconcile_txn(
    tx: &TransactionalTree,
    request: &PurchaseRequest,
    enforce: bool,
) -> TxnResult<Vec<QuantityAdvisory>> {
    let mut by_contract: BTreeMap<&str, (u64, &str)> = BTreeMap::new();
    for line in &request.lines {
        if let Some(contract_id) = line.contract_line_item_id.as_deref() {
            let slot = by_contract.entry(contract_id).or_insert((0, line.item_name.as_str()));
            // a saturated sum still fails admits() against any real contract
            slot.0 = slot.0.saturating_add(line.quantity);
        }
    }

    let mut advisories = Vec::new();
    for (contract_id, (requested, item_name)) in by_contract {
        let contract: ContractLineItem = match tx.get(utils::contract_key(contract_id))? {
            Some(raw) => decode_value(&raw)?,
            None => {
                return abort(WorkflowError::from(ValidationError::UnknownContractLine(
                    contract_id.to_string(),
                )));
            }
        };

        let peer_ids: Vec<String> = match tx.get(utils::line_index_key(contract_id))? {
            Some(raw) => decode_value(&raw)?,
            None => Vec::new(),
        };
        let mut peers = Vec::new();
        for peer_id in peer_ids.iter().filter(|id| id.as_str() != request.id) {
            if let Some(raw) = tx.get(utils::request_key(peer_id))? {
                peers.push(decode_value::<PurchaseRequest>(&raw)?);
            }
        }

        let committed = ledger::committed_quantity(&peers, contract_id, &request.id);
        let check = QuantityCheck {
            contracted: contract.contracted_quantity,
            committed,
        };
        if !check.admits(requested) {
            if enforce {
                return abort(WorkflowError::QuantityExceeded {
                    item_name: item_name.to_string(),
                    contracted: check.contracted,
                    committed: check.committed,
                    remaining: check.remaining(),
                    requested,
                });
            }
            advisories.push(QuantityAdvisory {
                contract_line_item_id: contract_id.to_string(),
                item_name: item_name.to_string(),
                contracted: check.contracted,
                committed: check.committed,
                remaining: check.remaining(),
                requested,
            });
        }
    }
    Ok(advisories)
}

fn remove_request_txn(tx: &TransactionalTree, request: &PurchaseRequest) -> TxnResult<()> {
    tx.remove(utils::request_key(&request.id))?;
    let contract_ids: BTreeSet<&str> = request
        .lines
        .iter()
        .filter_map(|line| line.contract_line_item_id.as_deref())
        .collect();
    for contract_id in contract_ids {
        unindex_request_txn(tx, contract_id, &request.id)?;
    }
    // audit entries stay behind for dispute resolution
    Ok(())
}

impl ProcurementService {
    pub fn new(instance: Arc<Db>) -> Self {
        Self { instance }
    }

    /// Open a new draft request for `project_id` with the given lines.
    pub fn create(
        &self,
        project_id: &str,
        actor: &Actor,
        lines: Vec<NewLine>,
    ) -> anyhow::Result<PurchaseRequest> {
        if !actor.role.may_create_requests() {
            return Err(WorkflowError::Forbidden {
                actor_id: actor.actor_id.clone(),
                action: "create purchase requests".to_string(),
            }
            .into());
        }
        if actor.role.is_project_scoped() && !actor.manages(project_id) {
            return Err(WorkflowError::Forbidden {
                actor_id: actor.actor_id.clone(),
                action: format!("create requests for project '{project_id}'"),
            }
            .into());
        }

        let request_id = utils::new_uuid_to_bech32("pr_")?;
        let now = TimeStamp::new();
        let today = Utc::now().format("%Y%m%d").to_string();

        let result = self.instance.transaction(|tx| {
            let contracts = resolve_contracts_txn(tx, &lines)?;
            let built = match request::build_lines(&lines, project_id, &contracts) {
                Ok(built) => built,
                Err(err) => return Err(ConflictableTransactionError::Abort(err)),
            };

            // next slot in today's request-code sequence
            let seq_key = utils::sequence_key(&today);
            let next: u32 = match tx.get(&seq_key)? {
                Some(raw) => decode_value::<u32>(&raw)? + 1,
                None => 1,
            };
            tx.insert(seq_key, encode_value(&next)?)?;

            let request = PurchaseRequest {
                id: request_id.clone(),
                request_code: utils::request_code(&today, next),
                project_id: project_id.to_string(),
                requester_id: actor.actor_id.clone(),
                status: RequestStatus::Draft,
                current_step: RequestStatus::Draft.step(),
                lines: built,
                created_at: now.clone(),
                updated_at: now.clone(),
            };

            tx.insert(utils::request_key(&request.id), encode_value(&request)?)?;
            for contract_id in contracts.keys() {
                index_request_txn(tx, contract_id, &request.id)?;
            }

            let entry = match WorkflowLogEntry::new(
                request.id.clone(),
                None,
                RequestStatus::Draft,
                ActionKind::Create,
                actor,
                None,
                None,
            ) {
                Ok(entry) => entry,
                Err(err) => return Err(ConflictableTransactionError::Abort(err)),
            };
            append_log_txn(tx, entry)?;

            Ok(request)
        });
        unwrap_txn(result)
    }

    /// Single entry point for submit / quote / approve / reject / complete /
    /// cancel / resubmit. Validates the transition against the workflow
    /// table, runs the reconciler where the step commits quantities, mutates
    /// the aggregate, and appends exactly one audit entry.
    pub fn transition(
        &self,
        request_id: &str,
        actor: &Actor,
        action: Action,
    ) -> anyhow::Result<TransitionOutcome> {
        let kind = action.kind();
        let now = TimeStamp::new();

        let result = self.instance.transaction(|tx| {
            let mut request = load_request_txn(tx, request_id)?;
            let target = match workflow::check_transition(&request, actor, kind) {
                Ok(target) => target,
                Err(err) => return abort(err),
            };

            let mut advisories = Vec::new();
            let mut operation_data = None;

            match &action {
                // soft check: over-balance lines become advisories, the
                // submission itself goes through
                Action::Submit => {
                    advisories = reconcile_txn(tx, &request, false)?;
                    if !advisories.is_empty() {
                        operation_data = Some(OperationData::Advisories {
                            exceeded: advisories.clone(),
                        });
                    }
                }
                Action::Quote {
                    quotes,
                    delivery_date,
                    ..
                } => {
                    if let Err(err) = request.apply_quotes(quotes) {
                        return abort(WorkflowError::from(err));
                    }
                    let total = match request.total_amount() {
                        Some(total) => total,
                        None => return abort(WorkflowError::from(ValidationError::IncompleteQuote)),
                    };
                    operation_data = Some(OperationData::Quote {
                        total_amount: total,
                        delivery_date: delivery_date.clone(),
                    });
                }
                // entry into the first committing state: hard check
                Action::DeptApprove { .. } => {
                    reconcile_txn(tx, &request, true)?;
                    operation_data = Some(OperationData::Review { approved: true });
                }
                // authoritative re-check before quantities become irrevocable
                Action::FinalApprove { .. } => {
                    reconcile_txn(tx, &request, true)?;
                    operation_data = Some(OperationData::Review { approved: true });
                }
                Action::Reject { .. } => {
                    operation_data = Some(OperationData::Review { approved: false });
                }
                Action::Resubmit => request.clear_quotes(),
                Action::Complete | Action::Cancel => {}
            }

            let from = request.status;
            request.set_status(target);
            request.updated_at = now.clone();

            tx.insert(utils::request_key(&request.id), encode_value(&request)?)?;

            let entry = match WorkflowLogEntry::new(
                request.id.clone(),
                Some(from),
                target,
                kind,
                actor,
                action.notes().map(str::to_string),
                operation_data,
            ) {
                Ok(entry) => entry,
                Err(err) => return Err(ConflictableTransactionError::Abort(err)),
            };
            append_log_txn(tx, entry)?;

            Ok((request, advisories))
        });

        let (request, advisories) = unwrap_txn(result)?;
        Ok(TransitionOutcome {
            request,
            advisories,
        })
    }

    /// Replace the lines of a draft. Only the owning requester may edit,
    /// and every line is re-validated against the contract ledger.
    pub fn update_lines(
        &self,
        request_id: &str,
        actor: &Actor,
        lines: Vec<NewLine>,
    ) -> anyhow::Result<PurchaseRequest> {
        let now = TimeStamp::new();

        let result = self.instance.transaction(|tx| {
            let mut request = load_request_txn(tx, request_id)?;
            if request.status != RequestStatus::Draft {
                return abort(WorkflowError::IllegalTransition {
                    state: request.status,
                    action: ActionKind::Update,
                });
            }
            if let Err(err) = workflow::ensure_owner(&request, actor, ActionKind::Update) {
                return abort(err);
            }

            let contracts = resolve_contracts_txn(tx, &lines)?;
            let built = match request::build_lines(&lines, &request.project_id, &contracts) {
                Ok(built) => built,
                Err(err) => return Err(ConflictableTransactionError::Abort(err)),
            };

            let old: BTreeSet<String> = request
                .lines
                .iter()
                .filter_map(|line| line.contract_line_item_id.clone())
                .collect();
            let new: BTreeSet<String> = contracts.keys().cloned().collect();
            for removed in old.difference(&new) {
                unindex_request_txn(tx, removed, &request.id)?;
            }
            for added in new.difference(&old) {
                index_request_txn(tx, added, &request.id)?;
            }

            request.lines = built;
            request.updated_at = now.clone();
            tx.insert(utils::request_key(&request.id), encode_value(&request)?)?;

            let entry = match WorkflowLogEntry::new(
                request.id.clone(),
                Some(RequestStatus::Draft),
                RequestStatus::Draft,
                ActionKind::Update,
                actor,
                None,
                None,
            ) {
                Ok(entry) => entry,
                Err(err) => return Err(ConflictableTransactionError::Abort(err)),
            };
            append_log_txn(tx, entry)?;

            Ok(request)
        });
        unwrap_txn(result)
    }

    /// Enumerate the requests the viewer may see, price-masked per role.
    pub fn list(&self, viewer: &Actor) -> anyhow::Result<Vec<RequestView>> {
        let scope = AccessScope::for_viewer(viewer);
        let mut views = Vec::new();
        if scope == AccessScope::Denied {
            return Ok(views);
        }
        for item in self.instance.scan_prefix(utils::REQUEST_PREFIX) {
            let (_key, raw) = item?;
            let request: PurchaseRequest = minicbor::decode(raw.as_ref())?;
            if scope.permits(&request.project_id) {
                views.push(visibility::render(&request, viewer));
            }
        }
        views.sort_by(|a, b| a.request_code.cmp(&b.request_code));
        Ok(views)
    }

    /// Read one request. A request outside the viewer's scope is Forbidden,
    /// not NotFound, so probes stay distinguishable from dead links.
    pub fn get(&self, request_id: &str, viewer: &Actor) -> anyhow::Result<RequestView> {
        let request = self.load_request(request_id)?;
        if !AccessScope::for_viewer(viewer).permits(&request.project_id) {
            return Err(WorkflowError::Forbidden {
                actor_id: viewer.actor_id.clone(),
                action: format!("read request '{request_id}'"),
            }
            .into());
        }
        Ok(visibility::render(&request, viewer))
    }

    /// Full transition history of a request, oldest first.
    pub fn history(
        &self,
        request_id: &str,
        viewer: &Actor,
    ) -> anyhow::Result<Vec<WorkflowLogEntry>> {
        let request = self.load_request(request_id)?;
        if !AccessScope::for_viewer(viewer).permits(&request.project_id) {
            return Err(WorkflowError::Forbidden {
                actor_id: viewer.actor_id.clone(),
                action: format!("read the history of request '{request_id}'"),
            }
            .into());
        }
        match self.instance.get(utils::audit_key(request_id))? {
            Some(raw) => Ok(minicbor::decode(raw.as_ref())?),
            None => Ok(Vec::new()),
        }
    }

    /// Delete a draft. The audit trail of the draft is kept.
    pub fn delete(&self, request_id: &str, actor: &Actor) -> anyhow::Result<()> {
        let result = self.instance.transaction(|tx| {
            let request = load_request_txn(tx, request_id)?;
            if let Err(err) = visibility::check_delete(&request, actor) {
                return abort(err);
            }
            remove_request_txn(tx, &request)
        });
        unwrap_txn(result)
    }

    /// Delete a batch of drafts, all or nothing: any missing or ineligible
    /// id blocks the entire batch and is named in the error.
    pub fn batch_delete(&self, request_ids: &[String], actor: &Actor) -> anyhow::Result<()> {
        let result = self.instance.transaction(|tx| {
            let mut eligible = Vec::new();
            let mut blocked = Vec::new();
            for request_id in request_ids {
                match tx.get(utils::request_key(request_id))? {
                    None => blocked.push(request_id.clone()),
                    Some(raw) => {
                        let request: PurchaseRequest = decode_value(&raw)?;
                        match visibility::check_delete(&request, actor) {
                            Ok(()) => eligible.push(request),
                            Err(_) => blocked.push(request_id.clone()),
                        }
                    }
                }
            }
            if !blocked.is_empty() {
                return abort(WorkflowError::BatchDeleteBlocked { blocked });
            }
            for request in &eligible {
                remove_request_txn(tx, request)?;
            }
            Ok(())
        });
        unwrap_txn(result)
    }

    fn load_request(&self, request_id: &str) -> anyhow::Result<PurchaseRequest> {
        match self.instance.get(utils::request_key(request_id))? {
            Some(raw) => Ok(minicbor::decode(raw.as_ref())?),
            None => Err(WorkflowError::NotFound(request_id.to_string()).into()),
        }
    }
}
