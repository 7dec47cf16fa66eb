use serde::{Deserialize, Serialize};

use super::claims::MatchedClaim;
use crate::holder::HeldCredential;

/// The outcome of evaluating a DCQL query against the held credentials.
///
/// Only satisfiable options and alternatives are kept. Every required credential set has at
/// least one of them, otherwise evaluation fails instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcqlResponse {
    credential_sets: Vec<DcqlResponseCredentialSet>,
    #[serde(skip)]
    offer_optional_omission: bool,
}

impl DcqlResponse {
    pub(super) fn new(
        credential_sets: Vec<DcqlResponseCredentialSet>,
        offer_optional_omission: bool,
    ) -> Self {
        Self {
            credential_sets,
            offer_optional_omission,
        }
    }

    /// One entry per credential set of the query, in query order.
    pub fn credential_sets(&self) -> &[DcqlResponseCredentialSet] {
        &self.credential_sets
    }

    pub fn credential_set(&self, set_index: usize) -> Option<&DcqlResponseCredentialSet> {
        self.credential_sets.get(set_index)
    }

    /// Every way of picking one match per credential set.
    ///
    /// The sequence is produced lazily and can be restarted by calling this again. Optional
    /// sets that could not be satisfied always contribute an omitted choice.
    pub fn combinations(&self) -> Combinations<'_> {
        let choices: Vec<Vec<Option<SetChoice<'_>>>> = self
            .credential_sets
            .iter()
            .map(|set| {
                let mut choices: Vec<Option<SetChoice<'_>>> = set
                    .options
                    .iter()
                    .flat_map(|option| {
                        option.matches.iter().map(move |m| {
                            Some(SetChoice {
                                set_index: set.set_index,
                                option_index: option.option_index,
                                matched: m,
                            })
                        })
                    })
                    .collect();
                if !set.required && (choices.is_empty() || self.offer_optional_omission) {
                    choices.push(None);
                }
                choices
            })
            .collect();

        let exhausted = choices.iter().any(Vec::is_empty);
        Combinations {
            odometer: vec![0; choices.len()],
            choices,
            exhausted,
        }
    }

    /// The number of combinations, if it fits in a `usize`.
    pub fn combination_count(&self) -> Option<usize> {
        self.combinations()
            .choices
            .iter()
            .try_fold(1usize, |count, choices| count.checked_mul(choices.len()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcqlResponseCredentialSet {
    pub(super) set_index: usize,
    pub(super) required: bool,
    pub(super) options: Vec<DcqlResponseCredentialSetOption>,
}

impl DcqlResponseCredentialSet {
    pub fn set_index(&self) -> usize {
        self.set_index
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn is_satisfied(&self) -> bool {
        !self.options.is_empty()
    }

    /// The satisfiable options, in query order.
    pub fn options(&self) -> &[DcqlResponseCredentialSetOption] {
        &self.options
    }

    pub fn option(&self, option_index: usize) -> Option<&DcqlResponseCredentialSetOption> {
        self.options.iter().find(|o| o.option_index == option_index)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcqlResponseCredentialSetOption {
    pub(super) option_index: usize,
    pub(super) matches: Vec<DcqlMatch>,
}

impl DcqlResponseCredentialSetOption {
    /// Index of the option within its credential set in the query.
    pub fn option_index(&self) -> usize {
        self.option_index
    }

    /// One match per satisfiable alternative, in query order.
    pub fn matches(&self) -> &[DcqlMatch] {
        &self.matches
    }

    pub fn alternative(&self, alternative_index: usize) -> Option<&DcqlMatch> {
        self.matches
            .iter()
            .find(|m| m.alternative_index == alternative_index)
    }
}

/// An assignment of distinct held credentials to every credential query of one
/// alternative.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcqlMatch {
    pub(super) alternative_index: usize,
    pub(super) members: Vec<DcqlResponseCredentialSetOptionMember>,
}

impl DcqlMatch {
    pub fn alternative_index(&self) -> usize {
        self.alternative_index
    }

    /// In the order the alternative lists its credential query ids.
    pub fn members(&self) -> &[DcqlResponseCredentialSetOptionMember] {
        &self.members
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DcqlResponseCredentialSetOptionMember {
    pub(super) credential_query_id: String,
    pub(super) credential: HeldCredential,
    pub(super) matched_claims: Vec<MatchedClaim>,
    pub(super) requires_holder_binding: bool,
}

impl DcqlResponseCredentialSetOptionMember {
    pub fn credential_query_id(&self) -> &str {
        &self.credential_query_id
    }

    pub fn credential(&self) -> &HeldCredential {
        &self.credential
    }

    pub fn matched_claims(&self) -> &[MatchedClaim] {
        &self.matched_claims
    }

    /// Whether presenting this member needs a proof of possession.
    pub fn requires_holder_binding(&self) -> bool {
        self.requires_holder_binding
    }
}

/// What was picked for one credential set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SetChoice<'a> {
    pub set_index: usize,
    pub option_index: usize,
    pub matched: &'a DcqlMatch,
}

/// One element of [DcqlResponse::combinations], holding a choice per credential set.
#[derive(Debug, Clone, PartialEq)]
pub struct Combination<'a> {
    choices: Vec<Option<SetChoice<'a>>>,
}

impl<'a> Combination<'a> {
    /// `None` where an optional set is left out.
    pub fn choices(&self) -> &[Option<SetChoice<'a>>] {
        &self.choices
    }

    pub fn members(&self) -> impl Iterator<Item = &'a DcqlResponseCredentialSetOptionMember> + '_ {
        self.choices
            .iter()
            .flatten()
            .flat_map(|choice| {
                let matched: &'a DcqlMatch = choice.matched;
                matched.members.iter()
            })
    }

    /// The owned form a chooser hands back.
    pub fn to_selection_choice(&self) -> SelectionChoice {
        SelectionChoice {
            sets: self
                .choices
                .iter()
                .flatten()
                .map(|choice| SetSelection {
                    set_index: choice.set_index,
                    option_index: choice.option_index,
                    alternative_index: choice.matched.alternative_index,
                })
                .collect(),
        }
    }
}

/// Lazy cartesian product of the per-set choices, last set varying fastest.
#[derive(Debug, Clone)]
pub struct Combinations<'a> {
    choices: Vec<Vec<Option<SetChoice<'a>>>>,
    odometer: Vec<usize>,
    exhausted: bool,
}

impl<'a> Iterator for Combinations<'a> {
    type Item = Combination<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let combination = Combination {
            choices: self
                .odometer
                .iter()
                .zip(&self.choices)
                .map(|(&i, choices)| choices[i])
                .collect(),
        };

        self.exhausted = true;
        for (digit, choices) in self.odometer.iter_mut().zip(&self.choices).rev() {
            *digit += 1;
            if *digit < choices.len() {
                self.exhausted = false;
                break;
            }
            *digit = 0;
        }

        Some(combination)
    }
}

/// A chooser's pick: one match per included credential set, by index.
///
/// Optional sets may be left out; required sets may not.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct SelectionChoice {
    pub sets: Vec<SetSelection>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct SetSelection {
    pub set_index: usize,
    pub option_index: usize,
    pub alternative_index: usize,
}
