use std::fmt::Debug;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use num_bigint::BigUint;
use serde::Deserialize;
use serde_json::{json, Value as Json};
use sha3::{Digest, Keccak256};
use tracing::debug;
use url::Url;

use crate::core::{
    identifier::Iden3Id,
    util::{base_request, fetch, AsyncHttpClient},
};

const WORD: usize = 32;
const GET_STATE: &str = "getState(uint256)";
const GET_TRANSITION_INFO: &str = "getTransitionInfo(uint256)";

/// How the ledger corroborates a claimed identity state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StateResolution {
    /// The claimed state is the identity's current state.
    Latest,
    /// The identity never published a state and the claimed state is its genesis state.
    Genesis,
    /// The claimed state was published by the identity and replaced at `replaced_at` (unix
    /// seconds).
    Historical { replaced_at: u64 },
    /// The ledger does not back the claimed state.
    Untrusted { reason: String },
}

impl StateResolution {
    pub fn is_trusted(&self) -> bool {
        !matches!(self, StateResolution::Untrusted { .. })
    }
}

/// Resolves identity states against a trust anchor.
///
/// An `Err` means the anchor could not be reached. An unbacked state is an `Ok` carrying
/// [StateResolution::Untrusted].
#[async_trait]
pub trait StateResolver: Debug {
    async fn resolve(&self, id: &Iden3Id, state: &BigUint) -> Result<StateResolution>;
}

/// Resolves states with `eth_call` requests to the identity state contract.
#[derive(Debug)]
pub struct EthStateResolver<C> {
    client: C,
    rpc_endpoint: Url,
    contract_address: String,
}

impl<C> EthStateResolver<C> {
    pub fn new(client: C, rpc_endpoint: Url, contract_address: String) -> Result<Self> {
        let hex_address = contract_address
            .strip_prefix("0x")
            .context("contract address must be 0x prefixed")?;
        if hex::decode(hex_address).map(|a| a.len()) != Ok(20) {
            bail!("contract address '{contract_address}' is not a 20 byte hex string")
        }
        Ok(Self {
            client,
            rpc_endpoint,
            contract_address,
        })
    }
}

impl<C: AsyncHttpClient> EthStateResolver<C> {
    async fn call(&self, signature: &str, argument: &BigUint) -> Result<Vec<u8>> {
        let mut data = selector(signature).to_vec();
        data.extend(word(argument)?);

        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_call",
            "params": [
                { "to": self.contract_address, "data": format!("0x{}", hex::encode(data)) },
                "latest"
            ]
        });
        let request = base_request()
            .method("POST")
            .uri(self.rpc_endpoint.as_str())
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(&body)?)
            .context("failed to build eth_call request")?;

        let response: RpcResponse = serde_json::from_slice(
            &fetch(&self.client, request)
                .await
                .context(format!("eth_call {signature} failed"))?,
        )
        .context("ledger returned an invalid JSON-RPC response")?;

        match response {
            RpcResponse {
                result: Some(result),
                ..
            } => hex::decode(result.trim_start_matches("0x"))
                .context("ledger returned a non hex result"),
            RpcResponse {
                error: Some(error), ..
            } => bail!("eth_call {signature} was rejected: {error}"),
            _ => bail!("ledger response has neither result nor error"),
        }
    }
}

#[async_trait]
impl<C: AsyncHttpClient + Debug> StateResolver for EthStateResolver<C> {
    async fn resolve(&self, id: &Iden3Id, state: &BigUint) -> Result<StateResolution> {
        let latest = BigUint::from_bytes_be(first_word(&self.call(GET_STATE, &id.to_int()).await?)?);

        if latest == BigUint::default() {
            debug!(%id, "identity has no published state");
            return Ok(if id.is_genesis_of(state) {
                StateResolution::Genesis
            } else {
                StateResolution::Untrusted {
                    reason: format!("state of unpublished identity {id} is not its genesis state"),
                }
            });
        }
        if &latest == state {
            return Ok(StateResolution::Latest);
        }

        let info = self.call(GET_TRANSITION_INFO, state).await?;
        let words: Vec<BigUint> = info.chunks(WORD).map(BigUint::from_bytes_be).collect();
        let [replaced_at, _created_at, _replaced_at_block, _created_at_block, owner, _replaced_by] =
            words.as_slice()
        else {
            bail!("transition info has {} bytes", info.len())
        };

        if owner != &id.to_int() {
            return Ok(StateResolution::Untrusted {
                reason: format!("state was not published by {id}"),
            });
        }
        if replaced_at == &BigUint::default() {
            return Ok(StateResolution::Untrusted {
                reason: format!("state is neither the latest nor a replaced state of {id}"),
            });
        }
        Ok(StateResolution::Historical {
            replaced_at: u64::try_from(replaced_at).context("replacement time is out of range")?,
        })
    }
}

#[derive(Deserialize)]
struct RpcResponse {
    result: Option<String>,
    error: Option<Json>,
}

fn selector(signature: &str) -> [u8; 4] {
    let hash = Keccak256::digest(signature.as_bytes());
    [hash[0], hash[1], hash[2], hash[3]]
}

fn word(value: &BigUint) -> Result<[u8; WORD]> {
    let be = value.to_bytes_be();
    if be.len() > WORD {
        bail!("value does not fit in a uint256")
    }
    let mut word = [0u8; WORD];
    word[WORD - be.len()..].copy_from_slice(&be);
    Ok(word)
}

fn first_word(data: &[u8]) -> Result<&[u8]> {
    data.get(..WORD).context("ledger returned less than one word")
}
