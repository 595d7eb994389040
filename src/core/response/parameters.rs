use serde::{Deserialize, Serialize};

/// A Groth16 proof in snarkjs JSON form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZkProof {
    pub pi_a: Vec<String>,
    pub pi_b: Vec<Vec<String>>,
    pub pi_c: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
}

/// The proof answering one [ProofRequest](crate::core::authorization_request::parameters::ProofRequest).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofResponse {
    pub id: u32,
    /// Kept as received so that an unknown circuit is reported as a mismatch.
    pub circuit_id: String,
    pub proof: ZkProof,
    pub pub_signals: Vec<String>,
}

/// The third segment of a JWZ token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwzProof {
    pub proof: ZkProof,
    pub pub_signals: Vec<String>,
}
