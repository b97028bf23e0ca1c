//! Purchase request aggregate, line items, and the workflow state set.
use super::error::ValidationError;
use super::ledger::ContractLineItem;
use super::utils;
use super::workflow::LineQuote;
use chrono::{DateTime, TimeZone, Utc};
use std::collections::HashMap;

/// Lifecycle states of a purchase request.
///
/// `Completed` and `Cancelled` are terminal; `Rejected` can only be re-opened
/// back to `Draft` by the original requester.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestStatus {
    #[n(0)]
    Draft,
    #[n(1)]
    Submitted,
    #[n(2)]
    PriceQuoted,
    #[n(3)]
    DeptApproved,
    #[n(4)]
    FinalApproved,
    #[n(5)]
    Completed,
    #[n(6)]
    Rejected,
    #[n(7)]
    Cancelled,
}

/// Who acts next on a request in a given state. Denormalized onto the
/// aggregate for query convenience; always recomputed from the status.
#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStep {
    #[n(0)]
    Requester,
    #[n(1)]
    PurchasingAgent,
    #[n(2)]
    DepartmentManager,
    #[n(3)]
    GeneralManager,
    #[n(4)]
    Closed,
}

impl RequestStatus {
    pub const ALL: [RequestStatus; 8] = [
        RequestStatus::Draft,
        RequestStatus::Submitted,
        RequestStatus::PriceQuoted,
        RequestStatus::DeptApproved,
        RequestStatus::FinalApproved,
        RequestStatus::Completed,
        RequestStatus::Rejected,
        RequestStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Submitted => "submitted",
            RequestStatus::PriceQuoted => "price_quoted",
            RequestStatus::DeptApproved => "dept_approved",
            RequestStatus::FinalApproved => "final_approved",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    /// States whose quantities count against a contract line's balance.
    pub fn is_committing(&self) -> bool {
        matches!(
            self,
            RequestStatus::DeptApproved | RequestStatus::FinalApproved | RequestStatus::Completed
        )
    }

    pub fn step(&self) -> WorkflowStep {
        match self {
            RequestStatus::Draft | RequestStatus::Rejected => WorkflowStep::Requester,
            RequestStatus::Submitted | RequestStatus::FinalApproved => {
                WorkflowStep::PurchasingAgent
            }
            RequestStatus::PriceQuoted => WorkflowStep::DepartmentManager,
            RequestStatus::DeptApproved => WorkflowStep::GeneralManager,
            RequestStatus::Completed | RequestStatus::Cancelled => WorkflowStep::Closed,
        }
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Deterministic fixture constructor. Panics on an invalid calendar date,
/// which is acceptable in tests only.
#[cfg(test)]
impl TimeStamp<Utc> {
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}

/// Caller-supplied line input for `create` and `update_lines`.
#[derive(Debug, Clone)]
pub struct NewLine {
    pub contract_line_item_id: Option<String>,
    pub item_name: String,
    pub specification: String,
    pub unit: String,
    pub quantity: u64,
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone, PartialEq, Eq)]
pub struct PurchaseRequestLine {
    #[n(0)]
    pub id: String,
    /// `None` marks an auxiliary line that is exempt from reconciliation.
    #[n(1)]
    pub contract_line_item_id: Option<String>,
    #[n(2)]
    pub item_name: String,
    #[n(3)]
    pub specification: String,
    #[n(4)]
    pub unit: String,
    #[n(5)]
    pub quantity: u64,
    #[n(6)]
    pub unit_price: Option<u64>,
}

impl PurchaseRequestLine {
    /// `None` when the line is unpriced, or when the product does not fit
    /// in a `u64`.
    pub fn line_total(&self) -> Option<u64> {
        self.unit_price
            .and_then(|price| price.checked_mul(self.quantity))
    }
}

#[derive(minicbor::Encode, minicbor::Decode, Debug, Clone)]
pub struct PurchaseRequest {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub request_code: String,
    #[n(2)]
    pub project_id: String,
    #[n(3)]
    pub requester_id: String,
    #[n(4)]
    pub status: RequestStatus,
    #[n(5)]
    pub current_step: WorkflowStep,
    #[n(6)]
    pub lines: Vec<PurchaseRequestLine>,
    #[n(7)]
    pub created_at: TimeStamp<Utc>,
    #[n(8)]
    pub updated_at: TimeStamp<Utc>,
}

impl PurchaseRequest {
    /// Sum of line totals, available only once every line carries a price
    /// and the sum fits in a `u64`.
    pub fn total_amount(&self) -> Option<u64> {
        self.lines
            .iter()
            .map(|line| line.line_total())
            .try_fold(0u64, |acc, total| total.and_then(|t| acc.checked_add(t)))
    }

    /// Single writer for `status`; keeps `current_step` in lockstep.
    pub fn set_status(&mut self, status: RequestStatus) {
        self.status = status;
        self.current_step = status.step();
    }

    /// Attach quoted unit prices to the lines. Every line must end up priced
    /// and the resulting amounts must stay representable.
    pub fn apply_quotes(&mut self, quotes: &[LineQuote]) -> Result<(), ValidationError> {
        for quote in quotes {
            let line = self
                .lines
                .iter_mut()
                .find(|line| line.id == quote.line_id)
                .ok_or_else(|| ValidationError::UnknownLine(quote.line_id.clone()))?;
            line.unit_price = Some(quote.unit_price);
        }
        if self.lines.iter().any(|line| line.unit_price.is_none()) {
            return Err(ValidationError::IncompleteQuote);
        }
        // every line is priced, so a missing total means overflow
        if self.total_amount().is_none() {
            return Err(ValidationError::AmountOverflow);
        }
        Ok(())
    }

    /// Drop all quoted prices; a resubmitted request starts a fresh cycle.
    pub fn clear_quotes(&mut self) {
        for line in self.lines.iter_mut() {
            line.unit_price = None;
        }
    }
}

/// Validate caller-supplied lines against the referenced contract lines and
/// materialise them as request lines. Catalog lines must match the contract
/// line's name/specification/unit exactly and belong to the same project.
pub fn build_lines(
    lines: &[NewLine],
    project_id: &str,
    contracts: &HashMap<String, ContractLineItem>,
) -> anyhow::Result<Vec<PurchaseRequestLine>> {
    if lines.is_empty() {
        return Err(ValidationError::EmptyRequest.into());
    }

    let mut built = Vec::with_capacity(lines.len());
    for line in lines {
        if line.quantity == 0 {
            return Err(ValidationError::NonPositiveQuantity.into());
        }
        if let Some(contract_id) = line.contract_line_item_id.as_deref() {
            let contract = contracts
                .get(contract_id)
                .ok_or_else(|| ValidationError::UnknownContractLine(contract_id.to_string()))?;
            if contract.project_id != project_id {
                return Err(ValidationError::ForeignContractLine {
                    item_name: line.item_name.clone(),
                }
                .into());
            }
            for (field, ours, theirs) in [
                ("item_name", &line.item_name, &contract.item_name),
                ("specification", &line.specification, &contract.specification),
                ("unit", &line.unit, &contract.unit),
            ] {
                if ours != theirs {
                    return Err(ValidationError::CatalogDrift {
                        item_name: line.item_name.clone(),
                        field,
                    }
                    .into());
                }
            }
        }
        built.push(PurchaseRequestLine {
            id: utils::new_uuid_to_bech32("line_")?,
            contract_line_item_id: line.contract_line_item_id.clone(),
            item_name: line.item_name.clone(),
            specification: line.specification.clone(),
            unit: line.unit.clone(),
            quantity: line.quantity,
            unit_price: None,
        });
    }
    Ok(built)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(quantity: u64, unit_price: Option<u64>) -> PurchaseRequestLine {
        PurchaseRequestLine {
            id: "line_a".into(),
            contract_line_item_id: None,
            item_name: "rebar".into(),
            specification: "HRB400 12mm".into(),
            unit: "t".into(),
            quantity,
            unit_price,
        }
    }

    fn request_with(lines: Vec<PurchaseRequestLine>) -> PurchaseRequest {
        PurchaseRequest {
            id: "pr_a".into(),
            request_code: "PR-20250819-001".into(),
            project_id: "proj_a".into(),
            requester_id: "user_a".into(),
            status: RequestStatus::Draft,
            current_step: RequestStatus::Draft.step(),
            lines,
            created_at: TimeStamp::new(),
            updated_at: TimeStamp::new(),
        }
    }

    #[test]
    fn timestamp_encoding() {
        let original = TimeStamp::new_with(2025, 8, 19, 7, 30, 0);

        let encoding = minicbor::to_vec(&original).unwrap();
        let decode: TimeStamp<Utc> = minicbor::decode(&encoding).unwrap();

        assert_eq!(original, decode);
        assert_eq!(
            decode.to_datetime_utc(),
            original.to_datetime_utc()
        );
    }

    #[test]
    fn total_amount_is_none_until_every_line_is_priced() {
        let request = request_with(vec![line(3, Some(100)), line(2, None)]);
        assert_eq!(request.total_amount(), None);

        let request = request_with(vec![line(3, Some(100)), line(2, Some(50))]);
        assert_eq!(request.total_amount(), Some(400));
    }

    #[test]
    fn set_status_keeps_current_step_in_sync() {
        let mut request = request_with(vec![line(1, None)]);
        for status in RequestStatus::ALL {
            request.set_status(status);
            assert_eq!(request.current_step, status.step());
        }
    }

    #[test]
    fn clear_quotes_resets_prices() {
        let mut request = request_with(vec![line(3, Some(100))]);
        request.clear_quotes();
        assert_eq!(request.total_amount(), None);
    }

    #[test]
    fn line_total_refuses_to_overflow() {
        let line = line(1_000_000, Some(u64::MAX / 2));
        assert_eq!(line.line_total(), None);
    }

    #[test]
    fn apply_quotes_rejects_overflowing_amounts() {
        let mut request = request_with(vec![line(1_000_000, None)]);
        let err = request
            .apply_quotes(&[LineQuote {
                line_id: "line_a".into(),
                unit_price: u64::MAX / 2,
            }])
            .unwrap_err();
        assert_eq!(err, ValidationError::AmountOverflow);

        // per-line products that fit but sum past the limit are refused too
        let mut request = request_with(vec![line(1, None), line(1, None)]);
        request.lines[1].id = "line_b".into();
        let err = request
            .apply_quotes(&[
                LineQuote {
                    line_id: "line_a".into(),
                    unit_price: u64::MAX,
                },
                LineQuote {
                    line_id: "line_b".into(),
                    unit_price: u64::MAX,
                },
            ])
            .unwrap_err();
        assert_eq!(err, ValidationError::AmountOverflow);
    }
}
