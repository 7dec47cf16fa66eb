use std::{borrow::Cow, collections::HashSet};

use crate::{core::credential_format::ClaimFormatDesignation, utils::NonEmptyVec};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DcqlQueryError {
    #[error("invalid identifier '{0}': expected a non-empty string of alphanumerics, '_' or '-'")]
    InvalidId(String),
    #[error("DCQL query has no credential queries")]
    NoCredentials,
    #[error("duplicate credential query id '{0}'")]
    DuplicateCredentialId(String),
    #[error("credential query '{0}' does not accept any format")]
    NoAcceptedFormat(String),
    #[error("credential query '{id}' has invalid claim sets: {reason}")]
    InvalidClaimSets { id: String, reason: String },
    #[error("'credential_sets' is present but empty")]
    EmptyCredentialSets,
    #[error("credential set option has no alternatives")]
    EmptyOption,
    #[error("credential set alternative lists no credential query")]
    EmptyAlternative,
    #[error("credential set alternative lists '{0}' more than once")]
    RepeatedAlternativeMember(String),
    #[error("credential set references unknown credential query '{0}'")]
    UnknownCredentialId(String),
}

fn validate_id(id: &str) -> Result<(), DcqlQueryError> {
    let valid = !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(DcqlQueryError::InvalidId(id.to_owned()))
    }
}

/// A DCQL query, already validated: credential query ids are unique and every credential
/// set only references known ids.
///
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "UncheckedDcqlQuery")]
pub struct DcqlQuery {
    credentials: NonEmptyVec<DcqlCredentialQuery>,
    #[serde(skip_serializing_if = "Option::is_none")]
    credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
}

#[derive(Deserialize)]
struct UncheckedDcqlQuery {
    credentials: NonEmptyVec<DcqlCredentialQuery>,
    credential_sets: Option<NonEmptyVec<DcqlCredentialSetQuery>>,
}

impl TryFrom<UncheckedDcqlQuery> for DcqlQuery {
    type Error = DcqlQueryError;

    fn try_from(value: UncheckedDcqlQuery) -> Result<Self, Self::Error> {
        Self {
            credentials: value.credentials,
            credential_sets: value.credential_sets,
        }
        .validate()
    }
}

impl DcqlQuery {
    pub fn new(credentials: NonEmptyVec<DcqlCredentialQuery>) -> Result<Self, DcqlQueryError> {
        Self {
            credentials,
            credential_sets: None,
        }
        .validate()
    }

    /// Build from parts that have not been checked yet, e.g. assembled by a request parser.
    pub fn from_parts(
        credentials: Vec<DcqlCredentialQuery>,
        credential_sets: Option<Vec<DcqlCredentialSetQuery>>,
    ) -> Result<Self, DcqlQueryError> {
        let credentials =
            NonEmptyVec::maybe_new(credentials).ok_or(DcqlQueryError::NoCredentials)?;
        let credential_sets = match credential_sets {
            Some(sets) => Some(
                NonEmptyVec::maybe_new(sets).ok_or(DcqlQueryError::EmptyCredentialSets)?,
            ),
            None => None,
        };
        Self {
            credentials,
            credential_sets,
        }
        .validate()
    }

    pub fn with_credential_sets(
        self,
        credential_sets: NonEmptyVec<DcqlCredentialSetQuery>,
    ) -> Result<Self, DcqlQueryError> {
        Self {
            credential_sets: Some(credential_sets),
            ..self
        }
        .validate()
    }

    fn validate(self) -> Result<Self, DcqlQueryError> {
        let mut ids = HashSet::new();
        for credential in self.credentials.iter() {
            if !ids.insert(credential.id()) {
                return Err(DcqlQueryError::DuplicateCredentialId(
                    credential.id().to_owned(),
                ));
            }
        }

        let referenced = self
            .credential_sets
            .iter()
            .flat_map(|sets| sets.iter())
            .flat_map(|set| set.options().iter())
            .flat_map(|option| option.alternatives().iter())
            .flatten();
        for id in referenced {
            if !ids.contains(id.as_str()) {
                return Err(DcqlQueryError::UnknownCredentialId(id.clone()));
            }
        }

        Ok(self)
    }

    pub fn credentials(&self) -> &[DcqlCredentialQuery] {
        &self.credentials
    }

    pub fn credential(&self, id: &str) -> Option<&DcqlCredentialQuery> {
        self.credentials.iter().find(|c| c.id() == id)
    }

    pub fn credential_sets(&self) -> Option<&NonEmptyVec<DcqlCredentialSetQuery>> {
        self.credential_sets.as_ref()
    }

    /// The credential sets to evaluate.
    ///
    /// Without `credential_sets` every credential query is requested, which is the same as a
    /// single required set whose only option lists all of them.
    pub fn effective_credential_sets(&self) -> Cow<'_, [DcqlCredentialSetQuery]> {
        match &self.credential_sets {
            Some(sets) => Cow::Borrowed(&sets[..]),
            None => {
                let all = self.credentials.iter().map(|c| c.id().to_owned()).collect();
                Cow::Owned(vec![DcqlCredentialSetQuery {
                    options: NonEmptyVec::new(CredentialSetOption {
                        alternatives: NonEmptyVec::new(all),
                    }),
                    required: None,
                }])
            }
        }
    }
}

impl TryFrom<Json> for DcqlQuery {
    type Error = serde_json::Error;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        serde_json::from_value(value)
    }
}

/// A Credential Query object.
///
/// `format` accepts either a single format identifier or an array of them.
///
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.1>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "UncheckedCredentialQuery")]
pub struct DcqlCredentialQuery {
    /// Unique within the query. Alphanumerics, underscore and hyphen only.
    id: String,

    #[serde(rename = "format", serialize_with = "serialize_formats")]
    accepted_formats: NonEmptyVec<ClaimFormatDesignation>,

    /// Format specific constraints, e.g. `doctype_value` for mso_mdoc or `vct_values` for
    /// SD-JWT VC.
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    meta: serde_json::Map<String, Json>,

    #[serde(skip_serializing_if = "Option::is_none")]
    claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>,

    /// Alternative combinations of claim ids, in order of preference.
    #[serde(skip_serializing_if = "Option::is_none")]
    claim_sets: Option<NonEmptyVec<Vec<String>>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    require_cryptographic_holder_binding: Option<bool>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> From<OneOrMany<T>> for Vec<T> {
    fn from(value: OneOrMany<T>) -> Self {
        match value {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        }
    }
}

fn serialize_formats<S>(
    formats: &NonEmptyVec<ClaimFormatDesignation>,
    serializer: S,
) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    match formats.as_ref() {
        [single] => single.serialize(serializer),
        many => many.serialize(serializer),
    }
}

#[derive(Deserialize)]
struct UncheckedCredentialQuery {
    id: String,
    format: OneOrMany<ClaimFormatDesignation>,
    #[serde(default)]
    meta: serde_json::Map<String, Json>,
    claims: Option<NonEmptyVec<DcqlCredentialClaimsQuery>>,
    claim_sets: Option<NonEmptyVec<Vec<String>>>,
    require_cryptographic_holder_binding: Option<bool>,
}

impl TryFrom<UncheckedCredentialQuery> for DcqlCredentialQuery {
    type Error = DcqlQueryError;

    fn try_from(value: UncheckedCredentialQuery) -> Result<Self, Self::Error> {
        let mut query = Self::new(value.id, Vec::from(value.format))?.with_meta(value.meta);
        query.require_cryptographic_holder_binding = value.require_cryptographic_holder_binding;
        match value.claims {
            Some(claims) => query.with_claims(claims, value.claim_sets),
            None if value.claim_sets.is_some() => Err(DcqlQueryError::InvalidClaimSets {
                id: query.id,
                reason: "'claim_sets' without 'claims'".into(),
            }),
            None => Ok(query),
        }
    }
}

impl DcqlCredentialQuery {
    pub fn new(
        id: impl Into<String>,
        accepted_formats: impl IntoIterator<Item = ClaimFormatDesignation>,
    ) -> Result<Self, DcqlQueryError> {
        let id = id.into();
        validate_id(&id)?;
        let accepted_formats = NonEmptyVec::maybe_new(accepted_formats.into_iter().collect())
            .ok_or_else(|| DcqlQueryError::NoAcceptedFormat(id.clone()))?;
        Ok(Self {
            id,
            accepted_formats,
            meta: serde_json::Map::new(),
            claims: None,
            claim_sets: None,
            require_cryptographic_holder_binding: None,
        })
    }

    pub fn with_meta(mut self, meta: serde_json::Map<String, Json>) -> Self {
        self.meta = meta;
        self
    }

    /// Set the claim filters, and optionally the claim sets referencing them by id.
    pub fn with_claims(
        mut self,
        claims: NonEmptyVec<DcqlCredentialClaimsQuery>,
        claim_sets: Option<NonEmptyVec<Vec<String>>>,
    ) -> Result<Self, DcqlQueryError> {
        let invalid = |reason: String| DcqlQueryError::InvalidClaimSets {
            id: self.id.clone(),
            reason,
        };

        let mut claim_ids = HashSet::new();
        for id in claims.iter().filter_map(DcqlCredentialClaimsQuery::id) {
            validate_id(id)?;
            if !claim_ids.insert(id.as_str()) {
                return Err(invalid(format!("duplicate claim id '{id}'")));
            }
        }

        for claim_set in claim_sets.iter().flat_map(|sets| sets.iter()) {
            if claim_set.is_empty() {
                return Err(invalid("empty claim set".into()));
            }
            if let Some(unknown) = claim_set.iter().find(|id| !claim_ids.contains(id.as_str())) {
                return Err(invalid(format!("unknown claim id '{unknown}'")));
            }
        }

        self.claims = Some(claims);
        self.claim_sets = claim_sets;
        Ok(self)
    }

    pub fn with_require_cryptographic_holder_binding(mut self, required: bool) -> Self {
        self.require_cryptographic_holder_binding = Some(required);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn accepted_formats(&self) -> &NonEmptyVec<ClaimFormatDesignation> {
        &self.accepted_formats
    }

    pub fn accepts(&self, format: &ClaimFormatDesignation) -> bool {
        self.accepted_formats.contains(format)
    }

    pub fn meta(&self) -> &serde_json::Map<String, Json> {
        &self.meta
    }

    /// `meta.doctype_value` (mso_mdoc).
    pub fn doctype_value(&self) -> Option<&str> {
        self.meta.get("doctype_value").and_then(Json::as_str)
    }

    /// `meta.vct_values` (SD-JWT VC).
    pub fn vct_values(&self) -> Option<Vec<&str>> {
        self.meta
            .get("vct_values")
            .and_then(Json::as_array)
            .map(|values| values.iter().filter_map(Json::as_str).collect())
    }

    pub fn claims(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQuery>> {
        self.claims.as_ref()
    }

    pub fn claim_sets(&self) -> Option<&NonEmptyVec<Vec<String>>> {
        self.claim_sets.as_ref()
    }

    /// Defaults to `true` when not present.
    pub fn require_cryptographic_holder_binding(&self) -> bool {
        self.require_cryptographic_holder_binding.unwrap_or(true)
    }
}

/// One option of a credential set.
///
/// Each alternative is a list of credential query ids that must all be satisfied at once,
/// by distinct credentials. In JSON a flat list of ids is a single alternative and a list
/// of lists gives several.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(try_from = "CredentialSetOptionRepr", into = "CredentialSetOptionRepr")]
pub struct CredentialSetOption {
    alternatives: NonEmptyVec<Vec<String>>,
}

#[derive(Deserialize, Serialize)]
#[serde(untagged)]
enum CredentialSetOptionRepr {
    Single(Vec<String>),
    Alternatives(Vec<Vec<String>>),
}

impl TryFrom<CredentialSetOptionRepr> for CredentialSetOption {
    type Error = DcqlQueryError;

    fn try_from(value: CredentialSetOptionRepr) -> Result<Self, Self::Error> {
        match value {
            CredentialSetOptionRepr::Single(ids) => Self::new(vec![ids]),
            CredentialSetOptionRepr::Alternatives(alternatives) => Self::new(alternatives),
        }
    }
}

impl From<CredentialSetOption> for CredentialSetOptionRepr {
    fn from(value: CredentialSetOption) -> Self {
        let mut alternatives = value.alternatives.into_inner();
        if alternatives.len() == 1 {
            Self::Single(alternatives.remove(0))
        } else {
            Self::Alternatives(alternatives)
        }
    }
}

impl CredentialSetOption {
    pub fn new(alternatives: Vec<Vec<String>>) -> Result<Self, DcqlQueryError> {
        let alternatives =
            NonEmptyVec::maybe_new(alternatives).ok_or(DcqlQueryError::EmptyOption)?;
        for alternative in alternatives.iter() {
            if alternative.is_empty() {
                return Err(DcqlQueryError::EmptyAlternative);
            }
            let mut seen = HashSet::new();
            if let Some(repeated) = alternative.iter().find(|id| !seen.insert(id.as_str())) {
                return Err(DcqlQueryError::RepeatedAlternativeMember(repeated.clone()));
            }
        }
        Ok(Self { alternatives })
    }

    /// An option with a single alternative.
    pub fn all_of<I, S>(ids: I) -> Result<Self, DcqlQueryError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(vec![ids.into_iter().map(Into::into).collect()])
    }

    pub fn alternatives(&self) -> &NonEmptyVec<Vec<String>> {
        &self.alternatives
    }
}

/// A Credential Set Query object.
///
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.2>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialSetQuery {
    options: NonEmptyVec<CredentialSetOption>,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<bool>,
}

impl DcqlCredentialSetQuery {
    pub fn new(options: NonEmptyVec<CredentialSetOption>) -> Self {
        Self {
            options,
            required: None,
        }
    }

    pub fn with_required(mut self, required: bool) -> Self {
        self.required = Some(required);
        self
    }

    pub fn options(&self) -> &NonEmptyVec<CredentialSetOption> {
        &self.options
    }

    /// Defaults to `true` when not present.
    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(true)
    }
}

/// A Claims Query object.
///
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#section-6.3>
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DcqlCredentialClaimsQuery {
    /// Required when the credential query has `claim_sets`.
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    path: NonEmptyVec<DcqlCredentialClaimsQueryPath>,
    /// The claim matches when it equals any of these.
    #[serde(skip_serializing_if = "Option::is_none")]
    values: Option<NonEmptyVec<DcqlCredentialClaimsQueryValue>>,
    /// ISO/IEC 18013-5 `IntentToRetain`, mso_mdoc only.
    #[serde(skip_serializing_if = "Option::is_none")]
    intent_to_retain: Option<bool>,
}

impl DcqlCredentialClaimsQuery {
    pub fn new(path: NonEmptyVec<DcqlCredentialClaimsQueryPath>) -> Self {
        Self {
            id: None,
            path,
            values: None,
            intent_to_retain: None,
        }
    }

    /// Shorthand for the `[namespace, element_identifier]` path of an mdoc claim.
    pub fn mdoc(namespace: impl Into<String>, element_identifier: impl Into<String>) -> Self {
        let mut path = NonEmptyVec::new(DcqlCredentialClaimsQueryPath::String(namespace.into()));
        path.push(DcqlCredentialClaimsQueryPath::String(
            element_identifier.into(),
        ));
        Self::new(path)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_values(mut self, values: NonEmptyVec<DcqlCredentialClaimsQueryValue>) -> Self {
        self.values = Some(values);
        self
    }

    pub fn with_intent_to_retain(mut self, intent_to_retain: bool) -> Self {
        self.intent_to_retain = Some(intent_to_retain);
        self
    }

    pub fn id(&self) -> Option<&String> {
        self.id.as_ref()
    }

    pub fn path(&self) -> &[DcqlCredentialClaimsQueryPath] {
        &self.path
    }

    pub fn values(&self) -> Option<&NonEmptyVec<DcqlCredentialClaimsQueryValue>> {
        self.values.as_ref()
    }

    pub fn intent_to_retain(&self) -> Option<bool> {
        self.intent_to_retain
    }

    /// Whether `value` is acceptable. Without `values` any value is.
    pub fn accepts_value(&self, value: &Json) -> bool {
        self.values
            .as_ref()
            .map_or(true, |values| values.iter().any(|v| v.matches(value)))
    }

    /// For mso_mdoc the first path element is the namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.path.head().as_str()
    }

    /// For mso_mdoc the second path element is the element identifier.
    pub fn element_identifier(&self) -> Option<&str> {
        self.path.get(1).and_then(DcqlCredentialClaimsQueryPath::as_str)
    }

    /// The last named path element, e.g. `street` for `["address", "street"]`.
    pub fn claim_name(&self) -> Option<&str> {
        self.path
            .iter()
            .rev()
            .find_map(DcqlCredentialClaimsQueryPath::as_str)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryValue {
    String(String),
    Integer(i64),
    Boolean(bool),
}

impl DcqlCredentialClaimsQueryValue {
    pub fn matches(&self, value: &Json) -> bool {
        match (self, value) {
            (Self::String(expected), Json::String(actual)) => expected == actual,
            (Self::Integer(expected), Json::Number(actual)) => actual.as_i64() == Some(*expected),
            (Self::Boolean(expected), Json::Bool(actual)) => expected == actual,
            _ => false,
        }
    }
}

/// One element of a claims path pointer: an object key, an array index, or `null` for
/// every element of an array.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum DcqlCredentialClaimsQueryPath {
    String(String),
    Null,
    Integer(usize),
}

impl DcqlCredentialClaimsQueryPath {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}
