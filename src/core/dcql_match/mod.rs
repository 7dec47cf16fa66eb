//! Evaluation of a [DcqlQuery] against the credentials held by the wallet.
//!
//! For every credential query the candidates are the held credentials that have an accepted
//! format, satisfy the `meta` constraints and the claim filters. An alternative of a
//! credential set option is satisfiable when each of its credential queries can be given a
//! candidate of its own, with no credential used twice. That is a perfect bipartite
//! matching, found with augmenting paths; query ids are tried in request order and
//! candidates in candidate order, so the same inputs always give the same response.

pub mod claims;
pub mod response;

use std::{cmp::Ordering, collections::HashMap, fmt, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    core::dcql_query::{DcqlCredentialQuery, DcqlQuery, DcqlQueryError},
    holder::{CredentialStore, HeldCredential},
};

pub use claims::MatchedClaim;
pub use response::{
    Combination, Combinations, DcqlMatch, DcqlResponse, DcqlResponseCredentialSet,
    DcqlResponseCredentialSetOption, DcqlResponseCredentialSetOptionMember, SelectionChoice,
    SetChoice, SetSelection,
};

#[derive(Debug, thiserror::Error)]
pub enum DcqlError {
    #[error("malformed DCQL query: {0}")]
    MalformedQuery(#[from] DcqlQueryError),
    #[error("no matching credential for required credential set {set_index}")]
    Unsatisfiable { set_index: usize },
    #[error("failed to list held credentials: {0}")]
    Store(#[source] anyhow::Error),
    #[error("evaluation was cancelled")]
    Cancelled,
}

pub type CandidateComparator = dyn Fn(&HeldCredential, &HeldCredential) -> Ordering + Send + Sync;

/// Order in which candidates are tried, which decides between equally good matchings.
#[derive(Clone, Default)]
pub enum CandidateOrder {
    /// The order the credential store returned them in.
    #[default]
    AsProvided,
    /// A stable sort with the given comparator, e.g. most recently issued first.
    Custom(Arc<CandidateComparator>),
}

impl fmt::Debug for CandidateOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AsProvided => f.write_str("AsProvided"),
            Self::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MatchingOptions {
    /// Also offer to leave out satisfied optional credential sets.
    pub offer_optional_omission: bool,
    #[serde(skip)]
    pub candidate_order: CandidateOrder,
}

#[derive(Debug, Clone, Default)]
pub struct DcqlMatcher {
    options: MatchingOptions,
}

/// A held credential that satisfies one credential query.
struct Candidate {
    credential: usize,
    matched_claims: Vec<MatchedClaim>,
}

impl DcqlMatcher {
    pub fn new(options: MatchingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &MatchingOptions {
        &self.options
    }

    /// List the held credentials from `store`, then [DcqlMatcher::evaluate].
    pub async fn evaluate_store<S>(
        &self,
        query: &DcqlQuery,
        store: &S,
        cancel: &CancellationToken,
    ) -> Result<DcqlResponse, DcqlError>
    where
        S: CredentialStore + ?Sized,
    {
        let credentials = tokio::select! {
            _ = cancel.cancelled() => return Err(DcqlError::Cancelled),
            credentials = store.list_held_credentials() => credentials.map_err(DcqlError::Store)?,
        };
        self.evaluate(query, &credentials)
    }

    pub fn evaluate(
        &self,
        query: &DcqlQuery,
        credentials: &[HeldCredential],
    ) -> Result<DcqlResponse, DcqlError> {
        let credentials = self.order(credentials);

        let candidates: HashMap<&str, Vec<Candidate>> = query
            .credentials()
            .iter()
            .map(|credential_query| {
                (
                    credential_query.id(),
                    find_candidates(credential_query, &credentials),
                )
            })
            .collect();

        let mut credential_sets = Vec::new();
        for (set_index, set) in query.effective_credential_sets().iter().enumerate() {
            let mut options = Vec::new();
            for (option_index, option) in set.options().iter().enumerate() {
                let matches: Vec<response::DcqlMatch> = option
                    .alternatives()
                    .iter()
                    .enumerate()
                    .filter_map(|(alternative_index, alternative)| {
                        match_alternative(query, alternative, &candidates, &credentials).map(
                            |members| response::DcqlMatch {
                                alternative_index,
                                members,
                            },
                        )
                    })
                    .collect();

                debug!(
                    set_index,
                    option_index,
                    satisfiable_alternatives = matches.len(),
                    "evaluated credential set option"
                );
                if !matches.is_empty() {
                    options.push(response::DcqlResponseCredentialSetOption {
                        option_index,
                        matches,
                    });
                }
            }

            if options.is_empty() && set.is_required() {
                info!(set_index, "required credential set cannot be satisfied");
                return Err(DcqlError::Unsatisfiable { set_index });
            }

            credential_sets.push(response::DcqlResponseCredentialSet {
                set_index,
                required: set.is_required(),
                options,
            });
        }

        Ok(DcqlResponse::new(
            credential_sets,
            self.options.offer_optional_omission,
        ))
    }

    fn order<'a>(&self, credentials: &'a [HeldCredential]) -> Vec<&'a HeldCredential> {
        let mut ordered: Vec<&HeldCredential> = credentials.iter().collect();
        if let CandidateOrder::Custom(compare) = &self.options.candidate_order {
            ordered.sort_by(|a, b| compare(*a, *b));
        }
        ordered
    }
}

fn find_candidates(query: &DcqlCredentialQuery, credentials: &[&HeldCredential]) -> Vec<Candidate> {
    if !credentials.iter().any(|c| query.accepts(&c.format)) {
        warn!(
            query_id = query.id(),
            formats = ?query.accepted_formats(),
            "no held credential has an accepted format"
        );
        return Vec::new();
    }

    let doctype = query.doctype_value();
    let vct_values = query.vct_values();
    let binding = query.require_cryptographic_holder_binding();

    let candidates: Vec<Candidate> = credentials
        .iter()
        .enumerate()
        .filter(|(_, c)| query.accepts(&c.format))
        .filter(|(_, c)| doctype.map_or(true, |d| c.doctype.as_deref() == Some(d)))
        .filter(|(_, c)| {
            vct_values.as_ref().map_or(true, |values| {
                c.vct.as_deref().is_some_and(|vct| values.contains(&vct))
            })
        })
        .filter(|(_, c)| !binding || c.key_id.is_some())
        .filter_map(|(index, c)| {
            claims::match_claims(query, &c.claims).map(|matched_claims| Candidate {
                credential: index,
                matched_claims,
            })
        })
        .collect();

    debug!(
        query_id = query.id(),
        candidates = candidates.len(),
        "found candidates"
    );
    candidates
}

fn match_alternative(
    query: &DcqlQuery,
    alternative: &[String],
    candidates: &HashMap<&str, Vec<Candidate>>,
    credentials: &[&HeldCredential],
) -> Option<Vec<DcqlResponseCredentialSetOptionMember>> {
    let per_query: Vec<&[Candidate]> = alternative
        .iter()
        .map(|id| candidates.get(id.as_str()).map_or(&[][..], Vec::as_slice))
        .collect();

    let adjacency: Vec<Vec<usize>> = per_query
        .iter()
        .map(|candidates| candidates.iter().map(|c| c.credential).collect())
        .collect();

    let assignment = perfect_matching(&adjacency)?;

    alternative
        .iter()
        .zip(per_query)
        .zip(assignment)
        .map(|((id, candidates), credential)| {
            let candidate = candidates.iter().find(|c| c.credential == credential)?;
            let requires_holder_binding = query
                .credential(id)
                .map_or(true, DcqlCredentialQuery::require_cryptographic_holder_binding);
            Some(DcqlResponseCredentialSetOptionMember {
                credential_query_id: id.clone(),
                credential: credentials[credential].clone(),
                matched_claims: candidate.matched_claims.clone(),
                requires_holder_binding,
            })
        })
        .collect()
}

/// Assign a distinct right vertex to every left vertex of `adjacency`, or `None` when that
/// is impossible. Element `i` of the result is the vertex assigned to left vertex `i`.
fn perfect_matching(adjacency: &[Vec<usize>]) -> Option<Vec<usize>> {
    let mut owner: HashMap<usize, usize> = HashMap::new();
    for left in 0..adjacency.len() {
        let mut visited = vec![false; adjacency.len()];
        if !augment(left, adjacency, &mut visited, &mut owner) {
            return None;
        }
    }

    let mut assignment = vec![0; adjacency.len()];
    for (right, left) in owner {
        assignment[left] = right;
    }
    Some(assignment)
}

/// Kuhn's augmenting path step. `visited` is indexed by left vertex.
fn augment(
    left: usize,
    adjacency: &[Vec<usize>],
    visited: &mut [bool],
    owner: &mut HashMap<usize, usize>,
) -> bool {
    if visited[left] {
        return false;
    }
    visited[left] = true;

    for &right in &adjacency[left] {
        let free = match owner.get(&right).copied() {
            None => true,
            Some(current) => augment(current, adjacency, visited, owner),
        };
        if free {
            owner.insert(right, left);
            return true;
        }
    }
    false
}
