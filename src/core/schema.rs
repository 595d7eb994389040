use anyhow::{bail, Context, Result};
use num_bigint::BigUint;
use serde_json::Value as Json;
use sha3::{Digest, Keccak256};

const SCHEMA_HASH_LENGTH: usize = 16;
const JSON_LD_SERIALIZATION_PREFIX: &str = "iden3:v1:";

/// What a proof must commit to for a given schema, credential type and field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaContext {
    pub hash: BigUint,
    pub slot_index: u64,
}

impl SchemaContext {
    pub fn new(schema: &[u8], schema_type: &str, field: &str) -> Result<Self> {
        let document: Json =
            serde_json::from_slice(schema).context("schema is not a JSON document")?;
        Ok(Self {
            hash: schema_hash(schema, schema_type),
            slot_index: field_slot_index(&document, schema_type, field)?,
        })
    }
}

/// The `claimSchema` public signal for a schema document and credential type.
pub fn schema_hash(schema: &[u8], schema_type: &str) -> BigUint {
    let digest = Keccak256::new()
        .chain_update(schema)
        .chain_update(schema_type)
        .finalize();
    BigUint::from_bytes_le(&digest[digest.len() - SCHEMA_HASH_LENGTH..])
}

/// Index of the claim slot holding `field`.
pub fn field_slot_index(document: &Json, schema_type: &str, field: &str) -> Result<u64> {
    if let Some(serialization) = document.pointer("/$metadata/serialization") {
        return json_schema_slot(serialization, field);
    }
    if let Some(context) = document.get("@context") {
        return json_ld_slot(context, schema_type, field);
    }
    bail!("schema defines neither '@context' nor '$metadata.serialization'")
}

fn json_schema_slot(serialization: &Json, field: &str) -> Result<u64> {
    let Json::Object(slots) = serialization else {
        bail!("'$metadata.serialization' is not an object")
    };
    slots
        .iter()
        .find(|(_, name)| name.as_str() == Some(field))
        .map(|(slot, _)| slot_index(slot))
        .transpose()?
        .context(format!("field '{field}' is not serialized into a claim slot"))
}

fn json_ld_slot(context: &Json, schema_type: &str, field: &str) -> Result<u64> {
    let contexts: Vec<&Json> = match context {
        Json::Array(entries) => entries.iter().collect(),
        other => vec![other],
    };
    let serialization = contexts
        .into_iter()
        .find_map(|entry| {
            entry
                .get(schema_type)?
                .get("@context")?
                .get("iden3_serialization")?
                .as_str()
        })
        .context(format!("schema does not define type '{schema_type}'"))?;

    let pairs = serialization
        .strip_prefix(JSON_LD_SERIALIZATION_PREFIX)
        .context(format!("unsupported serialization '{serialization}'"))?;
    for pair in pairs.split('&') {
        if let Some((slot, name)) = pair.split_once('=') {
            if name == field {
                return slot_index(slot);
            }
        }
    }
    bail!("field '{field}' is not serialized into a claim slot")
}

fn slot_index(slot: &str) -> Result<u64> {
    Ok(match slot {
        "slotIndexA" | "indexDataSlotA" => 2,
        "slotIndexB" | "indexDataSlotB" => 3,
        "slotValueA" | "valueDataSlotA" => 6,
        "slotValueB" | "valueDataSlotB" => 7,
        other => bail!("unknown claim slot '{other}'"),
    })
}
