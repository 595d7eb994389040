use anyhow::{bail, Context, Result};
use base64::prelude::*;
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::{
    authorization_request::parameters::ZKP_MESSAGE_MEDIA_TYPE,
    circuits::{field_modulus, CircuitId},
};

use super::{
    parameters::{JwzProof, ZkProof},
    AuthorizationResponse,
};

const GROTH16: &str = "groth16";
const CIRCUIT_ID_HEADER: &str = "circuitId";

/// A decoded response payload: the message plus, when it arrived as a JWZ token, the proof that
/// authenticates the sender.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub message: AuthorizationResponse,
    pub auth: Option<JwzAuth>,
}

/// The `auth` circuit proof of a JWZ token, together with the digest it must commit to.
#[derive(Debug, Clone)]
pub struct JwzAuth {
    pub circuit_id: CircuitId,
    pub proof: ZkProof,
    pub pub_signals: Vec<String>,
    /// Challenge the proof must carry, derived from the signed header and payload.
    pub expected_challenge: BigUint,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwzHeader {
    pub alg: String,
    #[serde(rename = "circuitId")]
    pub circuit_id: CircuitId,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub crit: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

impl Default for JwzHeader {
    fn default() -> Self {
        Self {
            alg: GROTH16.to_owned(),
            circuit_id: CircuitId::Auth,
            crit: vec![CIRCUIT_ID_HEADER.to_owned()],
            typ: Some(ZKP_MESSAGE_MEDIA_TYPE.to_owned()),
        }
    }
}

/// Decode raw response bytes, either a plain JSON message or a compact JWZ token.
pub fn decode(raw: &[u8]) -> Result<Envelope> {
    let text = std::str::from_utf8(raw)
        .context("response is not valid UTF-8")?
        .trim();
    if text.starts_with('{') {
        let message = serde_json::from_str(text).context("response is not a valid message")?;
        return Ok(Envelope {
            message,
            auth: None,
        });
    }
    decode_jwz(text)
}

fn decode_jwz(token: &str) -> Result<Envelope> {
    let mut parts = token.split('.');
    let (Some(header_b64), Some(payload_b64), Some(proof_b64), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("response is neither a JSON message nor a compact JWZ token")
    };

    let header: JwzHeader = serde_json::from_slice(
        &BASE64_URL_SAFE_NO_PAD
            .decode(header_b64)
            .context("JWZ header is not valid base64url")?,
    )
    .context("JWZ header is not valid JSON")?;
    if header.alg != GROTH16 {
        bail!("unsupported JWZ algorithm '{}'", header.alg)
    }
    if header.circuit_id != CircuitId::Auth {
        bail!("JWZ must be signed with the auth circuit, not {}", header.circuit_id)
    }

    let payload = BASE64_URL_SAFE_NO_PAD
        .decode(payload_b64)
        .context("JWZ payload is not valid base64url")?;
    let message =
        serde_json::from_slice(&payload).context("JWZ payload is not a valid message")?;

    let JwzProof { proof, pub_signals } = serde_json::from_slice(
        &BASE64_URL_SAFE_NO_PAD
            .decode(proof_b64)
            .context("JWZ proof is not valid base64url")?,
    )
    .context("JWZ proof is not valid JSON")?;

    Ok(Envelope {
        message,
        auth: Some(JwzAuth {
            circuit_id: header.circuit_id,
            proof,
            pub_signals,
            expected_challenge: challenge(header_b64, payload_b64),
        }),
    })
}

/// SHA-256 of the signing input, read little-endian and reduced into the scalar field.
fn challenge(header_b64: &str, payload_b64: &str) -> BigUint {
    let digest = Sha256::new()
        .chain_update(header_b64)
        .chain_update(".")
        .chain_update(payload_b64)
        .finalize();
    BigUint::from_bytes_le(&digest) % field_modulus()
}

/// A JWZ token waiting for its auth proof. Used by holders and test harnesses.
#[derive(Debug, Clone)]
pub struct UnsignedJwz {
    header_b64: String,
    payload_b64: String,
}

impl UnsignedJwz {
    pub fn new(header: &JwzHeader, payload: &[u8]) -> Result<Self> {
        Ok(Self {
            header_b64: BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(header)?),
            payload_b64: BASE64_URL_SAFE_NO_PAD.encode(payload),
        })
    }

    /// The value the auth proof must expose as its `challenge` signal.
    pub fn challenge(&self) -> BigUint {
        challenge(&self.header_b64, &self.payload_b64)
    }

    pub fn sign(self, proof: ZkProof, pub_signals: Vec<String>) -> Result<String> {
        let proof = serde_json::to_vec(&JwzProof { proof, pub_signals })?;
        Ok(format!(
            "{}.{}.{}",
            self.header_b64,
            self.payload_b64,
            BASE64_URL_SAFE_NO_PAD.encode(proof)
        ))
    }
}
