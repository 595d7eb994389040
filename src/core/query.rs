use std::fmt;

use anyhow::{bail, Context, Error, Result};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use url::Url;

use crate::utils::NonEmptyVec;

use super::{
    authorization_request::parameters::{ProofRequest, Rules},
    circuits::{CircuitId, VALUE_ARRAY_SIZE},
    identifier::same_identity,
};

/// Allowed issuers entry matching any issuer.
pub const ANY_ISSUER: &str = "*";

/// Comparison operators supported by the atomic query circuits, with their circuit encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Noop,
    Eq,
    Lt,
    Gt,
    In,
    Nin,
}

impl Operator {
    /// The value of the `operator` public signal.
    pub fn code(&self) -> u64 {
        match self {
            Operator::Noop => 0,
            Operator::Eq => 1,
            Operator::Lt => 2,
            Operator::Gt => 3,
            Operator::In => 4,
            Operator::Nin => 5,
        }
    }

    pub fn from_code(code: u64) -> Option<Self> {
        Some(match code {
            0 => Operator::Noop,
            1 => Operator::Eq,
            2 => Operator::Lt,
            3 => Operator::Gt,
            4 => Operator::In,
            5 => Operator::Nin,
            _ => return None,
        })
    }

    /// The key used in the query's `req` object, e.g. `$lt`.
    pub fn key(&self) -> &'static str {
        match self {
            Operator::Noop => "$noop",
            Operator::Eq => "$eq",
            Operator::Lt => "$lt",
            Operator::Gt => "$gt",
            Operator::In => "$in",
            Operator::Nin => "$nin",
        }
    }

    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "$eq" => Operator::Eq,
            "$lt" => Operator::Lt,
            "$gt" => Operator::Gt,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            _ => return None,
        })
    }

    fn takes_set(&self) -> bool {
        matches!(self, Operator::In | Operator::Nin)
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// A single comparison over one credential field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate {
    field: String,
    operator: Operator,
    values: Vec<BigUint>,
}

impl Predicate {
    pub fn new(field: String, operator: Operator, values: Vec<BigUint>) -> Result<Self> {
        if field.is_empty() {
            bail!("predicate field name is empty")
        }
        match operator {
            Operator::Noop => bail!("a predicate needs a comparison operator"),
            op if op.takes_set() && values.is_empty() => {
                bail!("operator {op} needs at least one value")
            }
            op if !op.takes_set() && values.len() != 1 => {
                bail!("operator {op} needs exactly one value")
            }
            _ => {}
        }
        if values.len() > VALUE_ARRAY_SIZE {
            bail!("a predicate supports at most {VALUE_ARRAY_SIZE} values")
        }
        Ok(Self {
            field,
            operator,
            values,
        })
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn values(&self) -> &[BigUint] {
        &self.values
    }

    fn from_json(field: String, condition: Json) -> Result<Self> {
        let Json::Object(condition) = condition else {
            bail!("condition on '{field}' is not an object")
        };
        let mut entries = condition.into_iter();
        let (Some((key, operand)), None) = (entries.next(), entries.next()) else {
            bail!("condition on '{field}' must hold exactly one operator")
        };
        let operator =
            Operator::from_key(&key).context(format!("unsupported operator '{key}'"))?;
        let values = match operand {
            Json::Array(items) if operator.takes_set() => items
                .into_iter()
                .map(operand_value)
                .collect::<Result<Vec<_>>>()?,
            item if !operator.takes_set() => vec![operand_value(item)?],
            _ => bail!("operator {operator} expects an array operand"),
        };
        Self::new(field, operator, values)
    }

    fn to_json(&self) -> (String, Json) {
        let operand = if self.operator.takes_set() {
            Json::Array(self.values.iter().map(value_to_json).collect())
        } else {
            self.values.first().map(value_to_json).unwrap_or(Json::Null)
        };
        let mut condition = Map::new();
        condition.insert(self.operator.key().to_owned(), operand);
        (self.field.clone(), Json::Object(condition))
    }
}

fn operand_value(value: Json) -> Result<BigUint> {
    match value {
        Json::Number(n) => n
            .as_u64()
            .map(BigUint::from)
            .context(format!("operand {n} is not an unsigned integer")),
        Json::String(s) if !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) => {
            BigUint::parse_bytes(s.as_bytes(), 10).context("operand is not decimal")
        }
        Json::Bool(b) => Ok(BigUint::from(u8::from(b))),
        other => bail!("unsupported operand {other}"),
    }
}

fn value_to_json(value: &BigUint) -> Json {
    match u64::try_from(value) {
        Ok(n) => Json::from(n),
        Err(_) => Json::String(value.to_string()),
    }
}

/// Reference to the schema that defines the queried credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaRef {
    pub url: String,
    #[serde(rename = "type")]
    pub schema_type: String,
}

/// The claim a holder must prove: which issuers are trusted, which schema the credential
/// follows and what must hold for one of its fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawQuery", into = "RawQuery")]
pub struct Query {
    allowed_issuers: NonEmptyVec<String>,
    predicate: Option<Predicate>,
    schema: SchemaRef,
}

impl Query {
    pub fn allowed_issuers(&self) -> &[String] {
        &self.allowed_issuers
    }

    pub fn predicate(&self) -> Option<&Predicate> {
        self.predicate.as_ref()
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    /// The operator a proof of this query must carry.
    pub fn operator(&self) -> Operator {
        self.predicate
            .as_ref()
            .map(Predicate::operator)
            .unwrap_or(Operator::Noop)
    }

    pub fn allows_issuer(&self, issuer: &str) -> bool {
        self.allowed_issuers
            .iter()
            .any(|allowed| allowed == ANY_ISSUER || same_identity(allowed, issuer))
    }
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuery {
    allowed_issuers: Vec<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    req: Map<String, Json>,
    schema: SchemaRef,
}

impl TryFrom<RawQuery> for Query {
    type Error = Error;

    fn try_from(raw: RawQuery) -> Result<Self> {
        let allowed_issuers = NonEmptyVec::try_from(raw.allowed_issuers)
            .context("allowedIssuers must not be empty")?;
        let mut conditions = raw.req.into_iter();
        let predicate = match (conditions.next(), conditions.next()) {
            (None, _) => None,
            (Some((field, condition)), None) => Some(Predicate::from_json(field, condition)?),
            (Some(_), Some(_)) => bail!("a query holds at most one predicate"),
        };
        Ok(Self {
            allowed_issuers,
            predicate,
            schema: raw.schema,
        })
    }
}

impl From<Query> for RawQuery {
    fn from(query: Query) -> Self {
        let req = query.predicate.iter().map(Predicate::to_json).collect();
        Self {
            allowed_issuers: query.allowed_issuers.into_inner(),
            req,
            schema: query.schema,
        }
    }
}

/// A [Query] paired with the circuit that must prove it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimQuery {
    pub circuit_id: CircuitId,
    pub query: Query,
}

impl ClaimQuery {
    pub fn into_proof_request(self, id: u32) -> ProofRequest {
        ProofRequest {
            id,
            circuit_id: self.circuit_id,
            rules: Rules { query: self.query },
        }
    }
}

/// Builder for a [ClaimQuery].
///
/// ```ignore
/// let claim = QueryBuilder::new()
///     .with_schema(AGE_SCHEMA_URL, "AgeCredential")
///     .allow_any_issuer()
///     .with_predicate("WhenUserWasVaccinated", Operator::Lt, [20201008u64])
///     .build()?;
/// ```
#[derive(Debug, Clone)]
#[must_use]
pub struct QueryBuilder {
    circuit_id: CircuitId,
    allowed_issuers: Vec<String>,
    predicate: Option<(String, Operator, Vec<BigUint>)>,
    schema: Option<SchemaRef>,
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            circuit_id: CircuitId::AtomicQuerySig,
            allowed_issuers: Vec::new(),
            predicate: None,
            schema: None,
        }
    }

    /// Select the proof circuit. Defaults to `credentialAtomicQuerySig`.
    pub fn with_circuit(mut self, circuit_id: CircuitId) -> Self {
        self.circuit_id = circuit_id;
        self
    }

    pub fn with_schema(mut self, url: impl Into<String>, schema_type: impl Into<String>) -> Self {
        self.schema = Some(SchemaRef {
            url: url.into(),
            schema_type: schema_type.into(),
        });
        self
    }

    pub fn allow_issuer(mut self, issuer: impl Into<String>) -> Self {
        self.allowed_issuers.push(issuer.into());
        self
    }

    pub fn allow_any_issuer(self) -> Self {
        self.allow_issuer(ANY_ISSUER)
    }

    pub fn with_predicate<V: Into<BigUint>>(
        mut self,
        field: impl Into<String>,
        operator: Operator,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        self.predicate = Some((
            field.into(),
            operator,
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn build(self) -> Result<ClaimQuery> {
        if !self.circuit_id.is_query_circuit() {
            bail!("circuit {} cannot prove a query", self.circuit_id)
        }
        let Some(schema) = self.schema else {
            bail!("schema is required, see `with_schema`")
        };
        Url::parse(&schema.url).context(format!("schema url '{}' is invalid", schema.url))?;
        if schema.schema_type.is_empty() {
            bail!("schema type is empty")
        }
        let Some((field, operator, values)) = self.predicate else {
            bail!("predicate is required, see `with_predicate`")
        };
        let allowed_issuers = NonEmptyVec::try_from(self.allowed_issuers)
            .context("at least one allowed issuer is required, see `allow_issuer`")?;

        Ok(ClaimQuery {
            circuit_id: self.circuit_id,
            query: Query {
                allowed_issuers,
                predicate: Some(Predicate::new(field, operator, values)?),
                schema,
            },
        })
    }
}
