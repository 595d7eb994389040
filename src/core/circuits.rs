use std::{fmt, str::FromStr, sync::OnceLock};

use anyhow::{bail, Context, Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};

use super::identifier::Iden3Id;

const AUTH: &str = "auth";
const ATOMIC_QUERY_SIG: &str = "credentialAtomicQuerySig";
const ATOMIC_QUERY_MTP: &str = "credentialAtomicQueryMTP";

/// Length of the `values` array in the atomic query circuits.
pub const VALUE_ARRAY_SIZE: usize = 64;

const ATOMIC_QUERY_FIXED_SIGNALS: usize = 10;

const BN254_SCALAR_MODULUS: &str =
    "21888242871839275222246405745257275088548364400416034343698204186575808495617";

/// Order of the BN254 scalar field every public signal lives in.
pub fn field_modulus() -> &'static BigUint {
    static MODULUS: OnceLock<BigUint> = OnceLock::new();
    MODULUS.get_or_init(|| {
        BigUint::parse_bytes(BN254_SCALAR_MODULUS.as_bytes(), 10)
            .unwrap_or_else(|| unreachable!("modulus literal is decimal"))
    })
}

/// Parse a decimal public signal, rejecting values outside the scalar field.
pub fn parse_signal(signal: &str) -> Result<BigUint> {
    if signal.is_empty() || !signal.bytes().all(|b| b.is_ascii_digit()) {
        bail!("public signal '{signal}' is not a decimal integer")
    }
    let value = BigUint::parse_bytes(signal.as_bytes(), 10)
        .context(format!("public signal '{signal}' is not a decimal integer"))?;
    if &value >= field_modulus() {
        bail!("public signal '{signal}' is not a field element")
    }
    Ok(value)
}

/// The proof circuits this verifier understands. The circuit decides how the public signals of
/// a proof are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum CircuitId {
    /// Proves control of an identity, used to sign JWZ envelopes.
    Auth,
    /// Proves a query over a credential signed by the issuer's key.
    AtomicQuerySig,
    /// Proves a query over a credential included in the issuer's claims tree.
    AtomicQueryMtp,
}

impl CircuitId {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitId::Auth => AUTH,
            CircuitId::AtomicQuerySig => ATOMIC_QUERY_SIG,
            CircuitId::AtomicQueryMtp => ATOMIC_QUERY_MTP,
        }
    }

    /// Whether the circuit can answer a [Query](super::query::Query).
    pub fn is_query_circuit(&self) -> bool {
        matches!(self, CircuitId::AtomicQuerySig | CircuitId::AtomicQueryMtp)
    }
}

impl fmt::Display for CircuitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            AUTH => Ok(CircuitId::Auth),
            ATOMIC_QUERY_SIG => Ok(CircuitId::AtomicQuerySig),
            ATOMIC_QUERY_MTP => Ok(CircuitId::AtomicQueryMtp),
            other => bail!("unsupported circuit '{other}'"),
        }
    }
}

impl TryFrom<String> for CircuitId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CircuitId> for String {
    fn from(value: CircuitId) -> Self {
        value.as_str().to_owned()
    }
}

/// Public signals of the `auth` circuit: `[challenge, userState, userID]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPubSignals {
    pub challenge: BigUint,
    pub user_state: BigUint,
    pub user_id: Iden3Id,
}

impl AuthPubSignals {
    pub fn parse(signals: &[String]) -> Result<Self> {
        let [challenge, user_state, user_id] = signals else {
            bail!("auth circuit expects 3 public signals, got {}", signals.len())
        };
        Ok(Self {
            challenge: parse_signal(challenge)?,
            user_state: parse_signal(user_state)?,
            user_id: Iden3Id::from_int(&parse_signal(user_id)?).context("invalid userID")?,
        })
    }
}

/// Public signals shared by the atomic query circuits.
///
/// Order: userID, userState, challenge, issuer state (`issuerAuthState` for the signature
/// circuit, `issuerClaimIdenState` for the MTP circuit), issuerID, issuerClaimNonRevState,
/// timestamp, claimSchema, slotIndex, operator, values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomicQueryPubSignals {
    pub user_id: Iden3Id,
    pub user_state: BigUint,
    pub challenge: BigUint,
    pub issuer_state: BigUint,
    pub issuer_id: Iden3Id,
    pub issuer_non_rev_state: BigUint,
    pub timestamp: u64,
    pub claim_schema: BigUint,
    pub slot_index: u64,
    pub operator: u64,
    pub values: Vec<BigUint>,
}

impl AtomicQueryPubSignals {
    pub fn parse(signals: &[String]) -> Result<Self> {
        if signals.len() <= ATOMIC_QUERY_FIXED_SIGNALS {
            bail!(
                "atomic query circuits expect more than {ATOMIC_QUERY_FIXED_SIGNALS} public signals, got {}",
                signals.len()
            )
        }
        let (fixed, values) = signals.split_at(ATOMIC_QUERY_FIXED_SIGNALS);
        let field = |i: usize| parse_signal(&fixed[i]);
        let small = |i: usize, name: &str| -> Result<u64> {
            u64::try_from(&field(i)?).map_err(|_| Error::msg(format!("{name} is out of range")))
        };

        Ok(Self {
            user_id: Iden3Id::from_int(&field(0)?).context("invalid userID")?,
            user_state: field(1)?,
            challenge: field(2)?,
            issuer_state: field(3)?,
            issuer_id: Iden3Id::from_int(&field(4)?).context("invalid issuerID")?,
            issuer_non_rev_state: field(5)?,
            timestamp: small(6, "timestamp")?,
            claim_schema: field(7)?,
            slot_index: small(8, "slotIndex")?,
            operator: small(9, "operator")?,
            values: values
                .iter()
                .map(|v| parse_signal(v))
                .collect::<Result<_>>()?,
        })
    }
}
