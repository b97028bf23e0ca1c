//! Identifier, request-code, and key-space helpers.

use bech32::Bech32m;
use uuid7::uuid7;

// construct a unique id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Human-readable request code: `PR-{YYYYMMDD}-{3-digit daily sequence}`.
pub fn request_code(date: &str, sequence: u32) -> String {
    format!("PR-{date}-{sequence:03}")
}

// Key space of the default sled tree.
pub const REQUEST_PREFIX: &str = "request/";

pub fn request_key(request_id: &str) -> Vec<u8> {
    format!("{REQUEST_PREFIX}{request_id}").into_bytes()
}

pub fn audit_key(request_id: &str) -> Vec<u8> {
    format!("audit/{request_id}").into_bytes()
}

pub fn contract_key(contract_line_item_id: &str) -> Vec<u8> {
    format!("contract/{contract_line_item_id}").into_bytes()
}

pub fn line_index_key(contract_line_item_id: &str) -> Vec<u8> {
    format!("lineidx/{contract_line_item_id}").into_bytes()
}

pub fn sequence_key(date: &str) -> Vec<u8> {
    format!("seq/{date}").into_bytes()
}
