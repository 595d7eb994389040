use std::{fmt, str::FromStr};

use anyhow::{bail, Context, Error, Result};
use num_bigint::BigUint;

const ID_LENGTH: usize = 31;
const GENESIS_LENGTH: usize = 27;
const STATE_LENGTH: usize = 32;

/// An iden3 identity identifier.
///
/// The 31 bytes are laid out as `type[2] || genesis[27] || checksum[2]`, where `genesis` is cut
/// from the identity's first published state. Public signals carry the identifier as a
/// little-endian integer; the string form is base58.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Iden3Id([u8; ID_LENGTH]);

impl Iden3Id {
    /// Decode the integer form used in public signals.
    pub fn from_int(value: &BigUint) -> Result<Self> {
        let le = value.to_bytes_le();
        if le.len() > ID_LENGTH {
            bail!("identifier does not fit in {ID_LENGTH} bytes")
        }
        let mut bytes = [0u8; ID_LENGTH];
        bytes[..le.len()].copy_from_slice(&le);
        Self::from_bytes(bytes)
    }

    pub fn from_bytes(bytes: [u8; ID_LENGTH]) -> Result<Self> {
        let id = Self(bytes);
        let (id_type, genesis) = id.parts();
        if checksum(id_type, genesis) != bytes[ID_LENGTH - 2..] {
            bail!("identifier checksum does not match")
        }
        Ok(id)
    }

    /// Derive the identifier an identity of `id_type` gets when `state` is its genesis state.
    pub fn genesis_from_state(id_type: [u8; 2], state: &BigUint) -> Result<Self> {
        let le = state.to_bytes_le();
        if le.len() > STATE_LENGTH {
            bail!("state does not fit in {STATE_LENGTH} bytes")
        }
        let mut state_bytes = [0u8; STATE_LENGTH];
        state_bytes[..le.len()].copy_from_slice(&le);

        let mut genesis = [0u8; GENESIS_LENGTH];
        genesis.copy_from_slice(&state_bytes[STATE_LENGTH - GENESIS_LENGTH..]);

        let mut bytes = [0u8; ID_LENGTH];
        bytes[..2].copy_from_slice(&id_type);
        bytes[2..2 + GENESIS_LENGTH].copy_from_slice(&genesis);
        bytes[ID_LENGTH - 2..].copy_from_slice(&checksum(&id_type, &genesis));
        Ok(Self(bytes))
    }

    /// Whether `state` is the state this identifier was derived from.
    pub fn is_genesis_of(&self, state: &BigUint) -> bool {
        let id_type = [self.0[0], self.0[1]];
        Self::genesis_from_state(id_type, state)
            .map(|genesis| genesis == *self)
            .unwrap_or(false)
    }

    pub fn id_type(&self) -> [u8; 2] {
        [self.0[0], self.0[1]]
    }

    pub fn to_int(&self) -> BigUint {
        BigUint::from_bytes_le(&self.0)
    }

    pub fn as_bytes(&self) -> &[u8; ID_LENGTH] {
        &self.0
    }

    fn parts(&self) -> (&[u8], &[u8]) {
        (&self.0[..2], &self.0[2..2 + GENESIS_LENGTH])
    }
}

fn checksum(id_type: &[u8], genesis: &[u8]) -> [u8; 2] {
    let sum = id_type
        .iter()
        .chain(genesis)
        .fold(0u16, |acc, b| acc.wrapping_add(u16::from(*b)));
    [(sum >> 8) as u8, (sum & 0xff) as u8]
}

impl fmt::Display for Iden3Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&bs58::encode(self.0).into_string())
    }
}

impl fmt::Debug for Iden3Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Iden3Id({self})")
    }
}

impl FromStr for Iden3Id {
    type Err = Error;

    /// Accepts the bare base58 form or a DID whose last segment is the base58 form.
    fn from_str(s: &str) -> Result<Self> {
        let encoded = last_segment(s);
        let decoded = bs58::decode(encoded)
            .into_vec()
            .context("identifier is not valid base58")?;
        let bytes: [u8; ID_LENGTH] = decoded
            .try_into()
            .map_err(|v: Vec<u8>| Error::msg(format!("identifier has {} bytes", v.len())))?;
        Self::from_bytes(bytes)
    }
}

/// Check the `did:<method>:<method-specific-id>` syntax.
pub fn validate_did(did: &str) -> Result<()> {
    let Some(rest) = did.strip_prefix("did:") else {
        bail!("'{did}' does not start with 'did:'")
    };
    let Some((method, specific_id)) = rest.split_once(':') else {
        bail!("'{did}' has no method-specific identifier")
    };
    if method.is_empty()
        || !method
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
    {
        bail!("'{did}' has an invalid method name")
    }
    if specific_id.is_empty()
        || specific_id.ends_with(':')
        || !specific_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':' | '%'))
    {
        bail!("'{did}' has an invalid method-specific identifier")
    }
    Ok(())
}

/// Compare two identifiers that may each be a bare identifier or a DID wrapping it.
pub fn same_identity(a: &str, b: &str) -> bool {
    a == b || last_segment(a) == last_segment(b)
}

fn last_segment(s: &str) -> &str {
    s.rsplit(':').next().unwrap_or(s)
}
