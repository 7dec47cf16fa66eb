use std::sync::Arc;

use mdoc_presentment::{
    config::Config,
    core::{
        dcql_match::DcqlMatcher,
        dcql_query::DcqlQuery,
        device_engagement::{
            BleOptions, ConnectionMethodOptions, ConnectionMethodRegistry, DeviceEngagement,
        },
        session_transcript::{Handover, SessionTranscript},
    },
    holder::{MemoryCredentialStore, MemoryKeyUnlocker},
    presentment::{AutomaticChooser, PresentmentCoordinator, PresentmentState},
};
use serde_json::json;
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

mod wallet;

use wallet::{mdl, pid, MDL_DOCTYPE, MDL_NAMESPACE};

#[tokio::test]
async fn proximity_presentment() {
    let config = Config::from_json_str(
        r#"{
            "engagement": { "connection_method_errors": "strict" },
            "presentment": { "unlock_prompt": "Share your driving licence" }
        }"#,
    )
    .unwrap();

    // Holder side: publish an engagement, the reader scans it.
    let published = DeviceEngagement::builder("1.0", vec![0xa4, 0x01, 0x02, 0x20, 0x01])
        .with_connection_method(BleOptions::peripheral_server(Uuid::nil()).into_method())
        .build()
        .unwrap()
        .to_cbor_bytes()
        .unwrap();
    let engagement = DeviceEngagement::parse_with(
        &published,
        &config.engagement,
        &ConnectionMethodRegistry::default(),
    )
    .unwrap();
    let transcript = SessionTranscript::from_engagement(&engagement, vec![0xa1, 0x01, 0x02])
        .unwrap()
        .to_cbor_bytes()
        .unwrap();

    // The reader asks for name and age.
    let query: DcqlQuery = serde_json::from_value(json!({
        "credentials": [{
            "id": "mdl",
            "format": "mso_mdoc",
            "meta": { "doctype_value": MDL_DOCTYPE },
            "claims": [
                { "path": [MDL_NAMESPACE, "family_name"], "intent_to_retain": false },
                { "path": [MDL_NAMESPACE, "age_over_21"], "values": [true] }
            ]
        }]
    }))
    .unwrap();

    let store = MemoryCredentialStore::new(vec![
        pid("pid", "Mustermann"),
        mdl("minor", "Mustermann", false),
        mdl("adult", "Mustermann", true),
    ]);
    let cancel = CancellationToken::new();
    let response = DcqlMatcher::new(config.matching)
        .evaluate_store(&query, &store, &cancel)
        .await
        .unwrap();

    let unlocker = MemoryKeyUnlocker::new(["adult-key"]);
    let mut coordinator = PresentmentCoordinator::new(
        response,
        Arc::new(unlocker.clone()),
        config.presentment,
        cancel,
    )
    .with_session_transcript(transcript.clone());

    let outcome = coordinator.run(&AutomaticChooser).await.unwrap();
    assert_eq!(coordinator.state(), PresentmentState::Finalized);

    let members: Vec<_> = outcome.selection.members().collect();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].credential().id, "adult");
    assert_eq!(members[0].matched_claims().len(), 2);

    let mut expected = Sha256::new();
    expected.update(b"adult-key");
    expected.update(&transcript);
    assert_eq!(outcome.proofs[0].bytes(), expected.finalize().as_slice());
}

#[tokio::test]
async fn online_presentment_over_dc_api() {
    let handover = Handover::dc_api("https://verifier.example.com", "n-0S6_WzA2Mj", None).unwrap();
    let transcript = SessionTranscript::online(handover).to_cbor_bytes().unwrap();

    let query: DcqlQuery = serde_json::from_value(json!({
        "credentials": [{
            "id": "pid",
            "format": "dc+sd-jwt",
            "claims": [{ "path": ["address", "locality"] }]
        }]
    }))
    .unwrap();

    let response = DcqlMatcher::default()
        .evaluate(&query, &[pid("pid", "Mustermann")])
        .unwrap();
    let mut coordinator = PresentmentCoordinator::new(
        response,
        Arc::new(MemoryKeyUnlocker::new(["pid-key"])),
        Config::default().presentment,
        CancellationToken::new(),
    )
    .with_session_transcript(transcript);

    let outcome = coordinator.run(&AutomaticChooser).await.unwrap();
    let member = outcome.selection.members().next().unwrap();
    assert_eq!(member.matched_claims()[0].values, vec![json!("Berlin")]);
    assert_eq!(outcome.proofs.len(), 1);
}
