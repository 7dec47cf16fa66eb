use std::{
    collections::{BTreeSet, HashSet},
    fmt::Debug,
};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use super::PresentmentError;
use crate::core::dcql_match::{
    DcqlResponse, DcqlResponseCredentialSetOptionMember, SelectionChoice,
};

/// Picks what to present out of a [DcqlResponse]. Usually a prompt shown to the user.
#[async_trait]
pub trait CredentialChooser: Debug + Send + Sync {
    /// `Ok(None)` means the user declined to present anything.
    async fn choose(&self, response: &DcqlResponse) -> Result<Option<SelectionChoice>>;
}

/// Presents the first combination without asking.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutomaticChooser;

#[async_trait]
impl CredentialChooser for AutomaticChooser {
    async fn choose(&self, response: &DcqlResponse) -> Result<Option<SelectionChoice>> {
        Ok(response
            .combinations()
            .next()
            .map(|combination| combination.to_selection_choice()))
    }
}

/// The credentials committed to, one concrete match per included credential set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialPresentmentSelection {
    sets: Vec<SelectedCredentialSet>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SelectedCredentialSet {
    pub set_index: usize,
    pub required: bool,
    pub option_index: usize,
    pub alternative_index: usize,
    pub members: Vec<DcqlResponseCredentialSetOptionMember>,
}

impl CredentialPresentmentSelection {
    /// Check `choice` against `response` and copy out the chosen matches.
    pub fn resolve(
        response: &DcqlResponse,
        choice: &SelectionChoice,
    ) -> Result<Self, PresentmentError> {
        let invalid = PresentmentError::InvalidSelection;

        let mut seen = HashSet::new();
        let mut sets = Vec::with_capacity(choice.sets.len());
        for pick in &choice.sets {
            if !seen.insert(pick.set_index) {
                return Err(invalid(format!(
                    "credential set {} chosen more than once",
                    pick.set_index
                )));
            }
            let set = response
                .credential_set(pick.set_index)
                .ok_or_else(|| invalid(format!("no credential set {}", pick.set_index)))?;
            let matched = set
                .option(pick.option_index)
                .and_then(|option| option.alternative(pick.alternative_index))
                .ok_or_else(|| {
                    invalid(format!(
                        "credential set {} has no satisfiable option {} alternative {}",
                        pick.set_index, pick.option_index, pick.alternative_index
                    ))
                })?;
            sets.push(SelectedCredentialSet {
                set_index: pick.set_index,
                required: set.is_required(),
                option_index: pick.option_index,
                alternative_index: pick.alternative_index,
                members: matched.members().to_vec(),
            });
        }

        if let Some(missing) = response
            .credential_sets()
            .iter()
            .find(|set| set.is_required() && !seen.contains(&set.set_index()))
        {
            return Err(invalid(format!(
                "required credential set {} was not chosen",
                missing.set_index()
            )));
        }

        sets.sort_by_key(|set| set.set_index);
        Ok(Self { sets })
    }

    pub fn sets(&self) -> &[SelectedCredentialSet] {
        &self.sets
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    pub fn members(&self) -> impl Iterator<Item = &DcqlResponseCredentialSetOptionMember> {
        self.sets.iter().flat_map(|set| set.members.iter())
    }

    /// Keys that must be unlocked for proof of possession, each once, in selection order.
    pub fn key_ids(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.members()
            .filter(|member| member.requires_holder_binding())
            .filter_map(|member| member.credential().key_id.as_deref())
            .filter(|key_id| seen.insert(*key_id))
            .collect()
    }

    /// The selection without the optional sets that need one of `failed_keys`.
    ///
    /// `None` when a required set needs one of them.
    pub(super) fn without_keys(&self, failed_keys: &BTreeSet<String>) -> Option<Self> {
        let needs_failed_key = |set: &SelectedCredentialSet| {
            set.members.iter().any(|member| {
                member.requires_holder_binding()
                    && member
                        .credential()
                        .key_id
                        .as_ref()
                        .is_some_and(|key_id| failed_keys.contains(key_id))
            })
        };

        let mut sets = Vec::with_capacity(self.sets.len());
        for set in &self.sets {
            match (needs_failed_key(set), set.required) {
                (false, _) => sets.push(set.clone()),
                (true, false) => {}
                (true, true) => return None,
            }
        }
        Some(Self { sets })
    }
}
