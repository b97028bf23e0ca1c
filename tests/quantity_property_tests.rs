//! Property-based tests for cross-request quantity reconciliation
//!
//! This module drives a live service with randomized action sequences over a
//! shared contract line and checks the one invariant the reconciler exists to
//! protect: the quantities held by requests in committing states never exceed
//! the contracted quantity, no matter what order approvals, rejections, and
//! resubmissions arrive in.
//!
//! Each case opens its own temporary sled database, so the case count is kept
//! deliberately low.

use proptest::prelude::*;
use purchase_approval::{
    actor::{Actor, Role},
    ledger::{ContractLedger, ContractLineItem},
    request::{NewLine, PurchaseRequest, RequestStatus},
    service::ProcurementService,
    workflow::{Action, LineQuote},
};
use std::sync::Arc;

const CONTRACTED: u64 = 100;

struct Fixture {
    _temp: tempfile::TempDir,
    service: ProcurementService,
    contract_line_id: String,
    owner: Actor,
    agent: Actor,
    dept: Actor,
    general: Actor,
    admin: Actor,
}

fn fixture() -> Fixture {
    let temp = tempfile::tempdir().expect("tempdir");
    let db = Arc::new(sled::open(temp.path().join("prop.db")).expect("sled open"));

    let ledger = ContractLedger::new(Arc::clone(&db));
    let contract_line_id = "cli_prop".to_string();
    ledger
        .insert_line(&ContractLineItem {
            id: contract_line_id.clone(),
            project_id: "proj_prop".into(),
            item_name: "cement".into(),
            specification: "P.O 42.5".into(),
            unit: "t".into(),
            contracted_quantity: CONTRACTED,
            unit_price: 38_000,
        })
        .expect("seed contract line");

    Fixture {
        _temp: temp,
        service: ProcurementService::new(db),
        contract_line_id,
        owner: Actor::new("user_owner", Role::ProjectManager)
            .with_projects(vec!["proj_prop".into()]),
        agent: Actor::new("user_agent", Role::PurchasingAgent),
        dept: Actor::new("user_dept", Role::DepartmentManager),
        general: Actor::new("user_gm", Role::GeneralManager),
        admin: Actor::new("user_admin", Role::Administrator),
    }
}

fn create_request(fx: &Fixture, quantity: u64) -> PurchaseRequest {
    fx.service
        .create(
            "proj_prop",
            &fx.owner,
            vec![NewLine {
                contract_line_item_id: Some(fx.contract_line_id.clone()),
                item_name: "cement".into(),
                specification: "P.O 42.5".into(),
                unit: "t".into(),
                quantity,
            }],
        )
        .expect("create request")
}

/// Dispatch action number `action_idx` against a request, with the actor the
/// workflow expects for it. Guard and reconciliation errors are the point of
/// the exercise, so failures are ignored.
fn apply(fx: &Fixture, request: &PurchaseRequest, action_idx: usize) {
    let status = fx
        .service
        .get(&request.id, &fx.admin)
        .expect("request should exist")
        .status;

    let (actor, action) = match action_idx {
        0 => (&fx.owner, Action::Submit),
        1 => (
            &fx.agent,
            Action::Quote {
                quotes: request
                    .lines
                    .iter()
                    .map(|line| LineQuote {
                        line_id: line.id.clone(),
                        unit_price: 38_500,
                    })
                    .collect(),
                delivery_date: None,
                notes: None,
            },
        ),
        2 => (&fx.dept, Action::DeptApprove { notes: None }),
        3 => (&fx.general, Action::FinalApprove { notes: None }),
        4 => {
            let reviewer = match status {
                RequestStatus::Submitted => &fx.agent,
                RequestStatus::PriceQuoted => &fx.dept,
                _ => &fx.general,
            };
            (reviewer, Action::Reject { notes: None })
        }
        5 => (&fx.agent, Action::Complete),
        6 => (&fx.owner, Action::Cancel),
        _ => (&fx.owner, Action::Resubmit),
    };

    let _ = fx.service.transition(&request.id, actor, action);
}

/// Sum of quantities on the shared contract line across every request that
/// currently sits in a committing state, read back through admin views.
fn committed_total(fx: &Fixture, requests: &[PurchaseRequest]) -> u64 {
    requests
        .iter()
        .map(|request| {
            let view = fx
                .service
                .get(&request.id, &fx.admin)
                .expect("request should exist");
            if !view.status.is_committing() {
                return 0;
            }
            view.lines
                .iter()
                .filter(|line| line.contract_line_item_id.as_deref() == Some(&fx.contract_line_id))
                .map(|line| line.quantity)
                .sum()
        })
        .sum()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    /// Property: the contract balance can never be oversubscribed
    ///
    /// Three requests with random quantities compete for one contract line of
    /// 100 units while a random action sequence drives them through the
    /// workflow. After every single action, the committed total must be at
    /// most the contracted quantity. The dept-approve and final-approve hard
    /// checks are the only thing standing between this and over-commitment.
    #[test]
    fn prop_committed_quantities_never_exceed_the_contract(
        quantities in prop::collection::vec(1..=80u64, 3),
        ops in prop::collection::vec((0..3usize, 0..8usize), 1..40),
    ) {
        let fx = fixture();
        let requests: Vec<PurchaseRequest> =
            quantities.iter().map(|&q| create_request(&fx, q)).collect();

        for (request_idx, action_idx) in ops {
            apply(&fx, &requests[request_idx], action_idx);

            let committed = committed_total(&fx, &requests);
            prop_assert!(
                committed <= CONTRACTED,
                "committed {} exceeds contracted {}",
                committed,
                CONTRACTED
            );
        }
    }

    /// Property: the audit trail is append-only and grows by exactly one
    /// entry per successful action, never on a failed one.
    #[test]
    fn prop_audit_grows_only_on_success(
        quantity in 1..=80u64,
        ops in prop::collection::vec(0..8usize, 1..30),
    ) {
        let fx = fixture();
        let request = create_request(&fx, quantity);

        // the create itself is entry number one
        let mut expected = fx
            .service
            .history(&request.id, &fx.admin)
            .expect("history")
            .len();
        prop_assert_eq!(expected, 1);

        for action_idx in ops {
            let status_before = fx
                .service
                .get(&request.id, &fx.admin)
                .expect("request should exist")
                .status;

            let (actor, action) = match action_idx {
                0 => (&fx.owner, Action::Submit),
                1 => (
                    &fx.agent,
                    Action::Quote {
                        quotes: request
                            .lines
                            .iter()
                            .map(|line| LineQuote {
                                line_id: line.id.clone(),
                                unit_price: 38_500,
                            })
                            .collect(),
                        delivery_date: None,
                        notes: None,
                    },
                ),
                2 => (&fx.dept, Action::DeptApprove { notes: None }),
                3 => (&fx.general, Action::FinalApprove { notes: None }),
                4 => {
                    let reviewer = match status_before {
                        RequestStatus::Submitted => &fx.agent,
                        RequestStatus::PriceQuoted => &fx.dept,
                        _ => &fx.general,
                    };
                    (reviewer, Action::Reject { notes: None })
                }
                5 => (&fx.agent, Action::Complete),
                6 => (&fx.owner, Action::Cancel),
                _ => (&fx.owner, Action::Resubmit),
            };

            let result = fx.service.transition(&request.id, actor, action);
            if result.is_ok() {
                expected += 1;
            }

            let history = fx
                .service
                .history(&request.id, &fx.admin)
                .expect("history");
            prop_assert_eq!(history.len(), expected);

            // entries always chain: each from_step is the previous to_step
            for pair in history.windows(2) {
                prop_assert_eq!(pair[1].from_step, Some(pair[0].to_step));
            }
        }
    }
}
