use crate::request::RequestStatus;
use crate::workflow::ActionKind;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("action '{action}' is not valid from state '{state}'")]
    IllegalTransition {
        state: RequestStatus,
        action: ActionKind,
    },

    #[error(
        "requested {requested} of '{item_name}' exceeds the remaining contract balance \
         (contracted {contracted}, committed {committed}, remaining {remaining})"
    )]
    QuantityExceeded {
        item_name: String,
        contracted: u64,
        committed: u64,
        remaining: u64,
        requested: u64,
    },

    #[error("actor '{actor_id}' is not permitted to {action}")]
    Forbidden { actor_id: String, action: String },

    #[error("request '{0}' not found")]
    NotFound(String),

    #[error("request '{request_id}' cannot be deleted while in state '{state}'")]
    NotDeletable {
        request_id: String,
        state: RequestStatus,
    },

    #[error("batch delete blocked by ineligible request(s): {}", blocked.join(", "))]
    BatchDeleteBlocked { blocked: Vec<String> },

    #[error(transparent)]
    Validation(#[from] ValidationError),
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("line quantity must be greater than zero")]
    NonPositiveQuantity,
    #[error("a request must contain at least one line")]
    EmptyRequest,
    #[error("catalog line '{item_name}' diverges from its contract line on {field}")]
    CatalogDrift {
        item_name: String,
        field: &'static str,
    },
    #[error("contract line item '{0}' does not exist")]
    UnknownContractLine(String),
    #[error("contract line for '{item_name}' belongs to a different project")]
    ForeignContractLine { item_name: String },
    #[error("quote references unknown request line '{0}'")]
    UnknownLine(String),
    #[error("quote must attach a unit price to every line")]
    IncompleteQuote,
    #[error("quoted amounts overflow the representable total")]
    AmountOverflow,
}
