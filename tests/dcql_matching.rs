use std::future::pending;

use anyhow::{bail, Result};
use async_trait::async_trait;
use mdoc_presentment::{
    core::{
        credential_format::ClaimFormatDesignation,
        dcql_match::{DcqlError, DcqlMatcher, DcqlResponse, MatchingOptions, SelectionChoice},
        dcql_query::{DcqlCredentialQuery, DcqlQuery, DcqlQueryError},
    },
    holder::{CredentialStore, HeldCredential, MemoryCredentialStore},
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

mod wallet;

use wallet::{identity_query, mdl, pid, query, two_mdls_query, MDL_NAMESPACE};

fn credential_ids(response: &DcqlResponse) -> Vec<Vec<String>> {
    response
        .combinations()
        .map(|combination| {
            combination
                .members()
                .map(|member| member.credential().id.clone())
                .collect()
        })
        .collect()
}

#[test]
fn one_credential_cannot_answer_two_queries() {
    let result = DcqlMatcher::default().evaluate(&two_mdls_query(), &[mdl("a", "Doe", true)]);
    assert!(matches!(
        result,
        Err(DcqlError::Unsatisfiable { set_index: 0 })
    ));
}

#[test]
fn distinct_credentials_are_assigned() {
    let response = DcqlMatcher::default()
        .evaluate(
            &two_mdls_query(),
            &[mdl("a", "Doe", true), mdl("b", "Mustermann", false)],
        )
        .unwrap();

    assert_eq!(credential_ids(&response), vec![vec!["a", "b"]]);
    let combination = response.combinations().next().unwrap();
    let query_ids: Vec<_> = combination
        .members()
        .map(|member| member.credential_query_id())
        .collect();
    assert_eq!(query_ids, vec!["first", "second"]);
}

#[test]
fn narrower_query_gets_its_only_candidate() {
    // "first" accepts both credentials, "second" only the PID. The earlier query must give
    // way so that both are answered.
    let query = query(json!({
        "credentials": [
            { "id": "first", "format": ["mso_mdoc", "dc+sd-jwt"] },
            { "id": "second", "format": "dc+sd-jwt" }
        ]
    }));
    let response = DcqlMatcher::default()
        .evaluate(&query, &[pid("p", "Doe"), mdl("m", "Doe", true)])
        .unwrap();

    assert_eq!(credential_ids(&response), vec![vec!["m", "p"]]);
}

#[test]
fn options_and_optional_sets() {
    let response = DcqlMatcher::default()
        .evaluate(
            &identity_query(),
            &[mdl("m", "Doe", false), pid("p", "Doe")],
        )
        .unwrap();

    let [required, optional] = response.credential_sets() else {
        panic!("expected two credential sets")
    };
    assert!(required.is_required());
    assert_eq!(required.options().len(), 2);
    assert!(!optional.is_required());
    assert!(!optional.is_satisfied());

    assert_eq!(response.combination_count(), Some(2));
    assert_eq!(credential_ids(&response), vec![vec!["m"], vec!["p"]]);

    let first = response.combinations().next().unwrap();
    assert!(first.choices()[1].is_none());
}

#[test]
fn satisfied_optional_set_can_be_left_out() {
    let credentials = [mdl("m", "Doe", true)];

    let response = DcqlMatcher::default()
        .evaluate(&identity_query(), &credentials)
        .unwrap();
    assert_eq!(credential_ids(&response), vec![vec!["m", "m"]]);

    let response = DcqlMatcher::new(MatchingOptions {
        offer_optional_omission: true,
        ..Default::default()
    })
    .evaluate(&identity_query(), &credentials)
    .unwrap();
    assert_eq!(credential_ids(&response), vec![vec!["m", "m"], vec!["m"]]);
}

#[test]
fn required_set_failure_fails_evaluation() {
    let mut photo_id = mdl("photo", "Doe", true);
    photo_id.doctype = Some("org.iso.23220.photoid.1".into());

    let result = DcqlMatcher::default().evaluate(&identity_query(), &[photo_id]);
    assert!(matches!(
        result,
        Err(DcqlError::Unsatisfiable { set_index: 0 })
    ));
}

#[test]
fn evaluation_is_deterministic() {
    let credentials = [
        mdl("m1", "Doe", true),
        pid("p1", "Doe"),
        mdl("m2", "Doe", true),
        pid("p2", "Doe"),
    ];
    let matcher = DcqlMatcher::new(MatchingOptions {
        offer_optional_omission: true,
        ..Default::default()
    });

    let first = matcher.evaluate(&identity_query(), &credentials).unwrap();
    let second = matcher.evaluate(&identity_query(), &credentials).unwrap();
    assert_eq!(first, second);

    let choices = |response: &DcqlResponse| -> Vec<SelectionChoice> {
        response
            .combinations()
            .map(|combination| combination.to_selection_choice())
            .collect()
    };
    assert_eq!(choices(&first), choices(&second));
    // mDL or PID for the first set, the age check or nothing for the second.
    assert_eq!(first.combination_count(), Some(4));
    assert_eq!(
        credential_ids(&first),
        vec![vec!["m1", "m1"], vec!["m1"], vec!["p1", "m1"], vec!["p1"]]
    );
}

#[test]
fn unbound_credential_when_binding_is_not_required() {
    let query = query(json!({
        "credentials": [{
            "id": "mdl",
            "format": "mso_mdoc",
            "require_cryptographic_holder_binding": false,
            "claims": [{ "path": [MDL_NAMESPACE, "family_name"] }]
        }]
    }));
    let mut unbound = mdl("m", "Doe", true);
    unbound.key_id = None;

    let response = DcqlMatcher::default().evaluate(&query, &[unbound]).unwrap();
    let combination = response.combinations().next().unwrap();
    let member = combination.members().next().unwrap();
    assert!(!member.requires_holder_binding());
    assert_eq!(member.matched_claims()[0].values, vec![json!("Doe")]);
}

#[test]
fn malformed_query_is_reported() {
    fn evaluate(credentials: &[HeldCredential]) -> Result<DcqlResponse, DcqlError> {
        let mdl = DcqlCredentialQuery::new("mdl", [ClaimFormatDesignation::MsoMDoc])?;
        let query = DcqlQuery::from_parts(vec![mdl.clone(), mdl], None)?;
        DcqlMatcher::default().evaluate(&query, credentials)
    }

    assert!(matches!(
        evaluate(&[]),
        Err(DcqlError::MalformedQuery(DcqlQueryError::DuplicateCredentialId(id))) if id == "mdl"
    ));
}

#[test]
fn credential_set_with_unknown_id_is_rejected() {
    let result = serde_json::from_value::<DcqlQuery>(json!({
        "credentials": [{ "id": "mdl", "format": "mso_mdoc" }],
        "credential_sets": [{ "options": [["pid"]] }]
    }));
    assert!(result.is_err());
}

#[tokio::test]
async fn evaluate_from_store() {
    let store = MemoryCredentialStore::new(vec![mdl("a", "Doe", true)]);
    store.insert(mdl("b", "Doe", true)).await;

    let response = DcqlMatcher::default()
        .evaluate_store(&two_mdls_query(), &store, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(credential_ids(&response), vec![vec!["a", "b"]]);
}

#[derive(Debug)]
struct StalledStore;

#[async_trait]
impl CredentialStore for StalledStore {
    async fn list_held_credentials(&self) -> Result<Vec<HeldCredential>> {
        pending().await
    }
}

#[derive(Debug)]
struct BrokenStore;

#[async_trait]
impl CredentialStore for BrokenStore {
    async fn list_held_credentials(&self) -> Result<Vec<HeldCredential>> {
        bail!("keystore unavailable")
    }
}

#[tokio::test]
async fn cancelled_while_listing_credentials() {
    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let result = DcqlMatcher::default()
        .evaluate_store(&two_mdls_query(), &StalledStore, &cancel)
        .await;
    assert!(matches!(result, Err(DcqlError::Cancelled)));
}

#[tokio::test]
async fn store_failure() {
    let result = DcqlMatcher::default()
        .evaluate_store(&two_mdls_query(), &BrokenStore, &CancellationToken::new())
        .await;
    assert!(matches!(result, Err(DcqlError::Store(_))));
}
