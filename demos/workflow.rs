//! Walk one purchase request through the full approval chain and print the
//! audit history at the end.
//!
//! Run with: `cargo run --example workflow`

use purchase_approval::actor::{Actor, Role};
use purchase_approval::ledger::{ContractLedger, ContractLineItem};
use purchase_approval::request::NewLine;
use purchase_approval::service::ProcurementService;
use purchase_approval::utils;
use purchase_approval::workflow::{Action, LineQuote};
use std::sync::Arc;

fn main() -> anyhow::Result<()> {
    let temp = tempfile::tempdir()?;
    let db = Arc::new(sled::open(temp.path().join("workflow.db"))?);

    let ledger = ContractLedger::new(Arc::clone(&db));
    let service = ProcurementService::new(Arc::clone(&db));

    let project_id = utils::new_uuid_to_bech32("proj_")?;
    let contract_line = ContractLineItem {
        id: utils::new_uuid_to_bech32("cli_")?,
        project_id: project_id.clone(),
        item_name: "cement".into(),
        specification: "P.O 42.5".into(),
        unit: "t".into(),
        contracted_quantity: 100,
        unit_price: 38_000,
    };
    ledger.insert_line(&contract_line)?;

    let manager = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::ProjectManager)
        .with_projects(vec![project_id.clone()]);
    let agent = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::PurchasingAgent);
    let dept = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::DepartmentManager);
    let general = Actor::new(utils::new_uuid_to_bech32("user_")?, Role::GeneralManager);

    let request = service.create(
        &project_id,
        &manager,
        vec![NewLine {
            contract_line_item_id: Some(contract_line.id.clone()),
            item_name: "cement".into(),
            specification: "P.O 42.5".into(),
            unit: "t".into(),
            quantity: 60,
        }],
    )?;
    println!("created {} ({})", request.request_code, request.id);

    let outcome = service.transition(&request.id, &manager, Action::Submit)?;
    println!("submitted, advisories: {}", outcome.advisories.len());

    let line_id = outcome.request.lines[0].id.clone();
    let outcome = service.transition(
        &request.id,
        &agent,
        Action::Quote {
            quotes: vec![LineQuote {
                line_id,
                unit_price: 38_500,
            }],
            delivery_date: None,
            notes: Some("two week lead time".into()),
        },
    )?;
    println!("quoted, total: {:?}", outcome.request.total_amount());

    service.transition(
        &request.id,
        &dept,
        Action::DeptApprove {
            notes: Some("within plan".into()),
        },
    )?;
    service.transition(
        &request.id,
        &general,
        Action::FinalApprove {
            notes: Some("approved".into()),
        },
    )?;
    let outcome = service.transition(&request.id, &agent, Action::Complete)?;
    println!("final status: {}", outcome.request.status);

    // price-masked view for the requesting project manager
    let view = service.get(&request.id, &manager)?;
    println!(
        "manager view: price_hidden={}, total={:?}",
        view.price_hidden, view.total_amount
    );

    for entry in service.history(&request.id, &agent)? {
        println!(
            "  {:>13} {} -> {} by {:?}",
            entry.operation.as_str(),
            entry
                .from_step
                .map(|s| s.as_str())
                .unwrap_or("-"),
            entry.to_step,
            entry.operator_role,
        );
    }

    Ok(())
}
