use anyhow::Result;
use zkauth::{
    core::query::{ClaimQuery, Operator, QueryBuilder},
    verifier::Verifier,
};

/// Schema of the age credential the sign-in flow asks for.
pub const AGE_SCHEMA_URL: &str = "https://s3.eu-west-1.amazonaws.com/polygonid-schemas/841c23c9-6ef7-4959-813a-d55a76493fcb.json-ld";
const AGE_CREDENTIAL_TYPE: &str = "AgeCredential";
const VACCINATION_FIELD: &str = "WhenUserWasVaccinated";
const VACCINATED_BEFORE: u64 = 20201008;

const FLOW_LABEL: &str = "test flow";
const CHALLENGE_MESSAGE: &str = "message to sign";

pub struct AppState {
    pub verifier: Verifier,
    pub claim_query: ClaimQuery,
    pub flow_label: String,
    pub challenge_message: String,
}

impl AppState {
    /// Sign-in asks for proof of vaccination before 2020-10-08, from any issuer.
    pub fn new(verifier: Verifier) -> Result<Self> {
        let claim_query = QueryBuilder::new()
            .with_schema(AGE_SCHEMA_URL, AGE_CREDENTIAL_TYPE)
            .allow_any_issuer()
            .with_predicate(VACCINATION_FIELD, Operator::Lt, [VACCINATED_BEFORE])
            .build()?;

        Ok(Self {
            verifier,
            claim_query,
            flow_label: FLOW_LABEL.to_owned(),
            challenge_message: CHALLENGE_MESSAGE.to_owned(),
        })
    }
}
