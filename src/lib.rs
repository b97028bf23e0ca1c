//! Purchase request workflow engine: a multi-role approval state machine
//! over a contract bill of materials, with cross-request quantity
//! reconciliation, role-scoped price visibility, and an append-only audit
//! trail.

pub mod actor;
pub mod audit;
pub mod error;
pub mod ledger;
pub mod request;
pub mod service;
pub mod utils;
pub mod visibility;
pub mod workflow;
