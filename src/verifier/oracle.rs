use std::{fmt::Debug, str::FromStr};

use ark_bn254::{Bn254, Fq, Fq2, Fr, G1Affine, G2Affine};
use ark_groth16::{prepare_verifying_key, Groth16, Proof, VerifyingKey};
use serde::Deserialize;

use crate::core::response::parameters::ZkProof;

/// Verifies a zero-knowledge proof against a verification key and its public signals.
///
/// `Ok(false)` means the proof is well formed but does not verify.
pub trait ProofOracle: Debug {
    fn verify(&self, key: &[u8], proof: &ZkProof, pub_signals: &[String])
        -> Result<bool, OracleError>;
}

#[derive(Debug, thiserror::Error)]
pub enum OracleError {
    #[error("invalid verification key: {0}")]
    Key(String),
    #[error("malformed proof: {0}")]
    Proof(String),
}

/// Groth16 over BN254, reading snarkjs `verification_key.json` files and proofs.
#[derive(Debug, Clone, Copy, Default)]
pub struct Groth16Oracle;

#[derive(Deserialize)]
struct SnarkjsVerificationKey {
    #[serde(default)]
    protocol: Option<String>,
    #[serde(default)]
    curve: Option<String>,
    vk_alpha_1: Vec<String>,
    vk_beta_2: Vec<Vec<String>>,
    vk_gamma_2: Vec<Vec<String>>,
    vk_delta_2: Vec<Vec<String>>,
    #[serde(rename = "IC")]
    ic: Vec<Vec<String>>,
}

impl ProofOracle for Groth16Oracle {
    fn verify(
        &self,
        key: &[u8],
        proof: &ZkProof,
        pub_signals: &[String],
    ) -> Result<bool, OracleError> {
        let vk = parse_verifying_key(key).map_err(OracleError::Key)?;
        let proof = parse_proof(proof).map_err(OracleError::Proof)?;
        let inputs = pub_signals
            .iter()
            .map(|s| fr(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(OracleError::Proof)?;

        if inputs.len() + 1 != vk.gamma_abc_g1.len() {
            return Ok(false);
        }

        let pvk = prepare_verifying_key(&vk);
        Groth16::<Bn254>::verify_proof(&pvk, &proof, &inputs)
            .map_err(|e| OracleError::Proof(e.to_string()))
    }
}

fn parse_verifying_key(key: &[u8]) -> Result<VerifyingKey<Bn254>, String> {
    let key: SnarkjsVerificationKey =
        serde_json::from_slice(key).map_err(|e| format!("not a snarkjs key: {e}"))?;
    if let Some(protocol) = key.protocol.as_deref().filter(|p| *p != "groth16") {
        return Err(format!("unsupported protocol '{protocol}'"));
    }
    if let Some(curve) = key.curve.as_deref().filter(|c| *c != "bn128") {
        return Err(format!("unsupported curve '{curve}'"));
    }
    Ok(VerifyingKey {
        alpha_g1: g1(&key.vk_alpha_1)?,
        beta_g2: g2(&key.vk_beta_2)?,
        gamma_g2: g2(&key.vk_gamma_2)?,
        delta_g2: g2(&key.vk_delta_2)?,
        gamma_abc_g1: key
            .ic
            .iter()
            .map(|point| g1(point))
            .collect::<Result<_, _>>()?,
    })
}

fn parse_proof(proof: &ZkProof) -> Result<Proof<Bn254>, String> {
    if let Some(protocol) = proof.protocol.as_deref().filter(|p| *p != "groth16") {
        return Err(format!("unsupported protocol '{protocol}'"));
    }
    Ok(Proof {
        a: g1(&proof.pi_a)?,
        b: g2(&proof.pi_b)?,
        c: g1(&proof.pi_c)?,
    })
}

fn fq(value: &str) -> Result<Fq, String> {
    Fq::from_str(value).map_err(|_| format!("'{value}' is not a base field element"))
}

fn fr(value: &str) -> Result<Fr, String> {
    Fr::from_str(value).map_err(|_| format!("'{value}' is not a scalar field element"))
}

/// Projective `[x, y, "1"]` with a unit `z`.
fn g1(point: &[String]) -> Result<G1Affine, String> {
    let [x, y, z] = point else {
        return Err(format!("G1 point has {} coordinates", point.len()));
    };
    if z != "1" {
        return Err("G1 point is not affine".into());
    }
    let point = G1Affine::new_unchecked(fq(x)?, fq(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("G1 point is not in the curve subgroup".into());
    }
    Ok(point)
}

/// Projective `[[x0, x1], [y0, y1], ["1", "0"]]` with a unit `z`.
fn g2(point: &[Vec<String>]) -> Result<G2Affine, String> {
    let [x, y, z] = point else {
        return Err(format!("G2 point has {} coordinates", point.len()));
    };
    if z.len() != 2 || z[0] != "1" || z[1] != "0" {
        return Err("G2 point is not affine".into());
    }
    let point = G2Affine::new_unchecked(fq2(x)?, fq2(y)?);
    if !point.is_on_curve() || !point.is_in_correct_subgroup_assuming_on_curve() {
        return Err("G2 point is not in the curve subgroup".into());
    }
    Ok(point)
}

fn fq2(coordinate: &[String]) -> Result<Fq2, String> {
    let [c0, c1] = coordinate else {
        return Err(format!(
            "extension field element has {} components",
            coordinate.len()
        ));
    };
    Ok(Fq2::new(fq(c0)?, fq(c1)?))
}
