use ciborium::Value as Cbor;
use mdoc_presentment::core::{
    device_engagement::{
        BleOptions, ConnectionMethod, ConnectionMethodErrorPolicy, ConnectionMethodOptions,
        ConnectionMethodRegistry, DeviceEngagement, EngagementError, EngagementParseOptions,
        NfcOptions, OriginInfo, OriginInfoDomain, RestOptions,
    },
    session_transcript::SessionTranscript,
};
use uuid::Uuid;

/// ISO/IEC 18013-5 Annex D.3.1.
const ANNEX_D_DEVICE_ENGAGEMENT: &str = "a30063312e30018201d818584ba4010220012158205a88d182bce5f42efa59943f33359d2e8a968ff289d93e5fa444b624343167fe225820b16e8cf858ddc7690407ba61d4c338237a8cfcf3de6aa672fc60a557aa32fc670281830201a300f401f50b5045efef742b2c4837a9a3b0e1d05a6917";

const ANNEX_D_E_DEVICE_KEY: &str = "a4010220012158205a88d182bce5f42efa59943f33359d2e8a968ff289d93e5fa444b624343167fe225820b16e8cf858ddc7690407ba61d4c338237a8cfcf3de6aa672fc60a557aa32fc67";

const CENTRAL_UUID: &str = "45efef74-2b2c-4837-a9a3-b0e1d05a6917";

fn encode(item: &Cbor) -> Vec<u8> {
    let mut bytes = Vec::new();
    ciborium::into_writer(item, &mut bytes).unwrap();
    bytes
}

fn uint(n: u64) -> Cbor {
    Cbor::Integer(n.into())
}

/// `{0: "1.0", 1: [suite, 24(h'a0')], 2: methods}`
fn engagement_with(suite: u64, methods: Vec<Cbor>) -> Vec<u8> {
    encode(&Cbor::Map(vec![
        (uint(0), Cbor::Text("1.0".into())),
        (
            uint(1),
            Cbor::Array(vec![
                uint(suite),
                Cbor::Tag(24, Box::new(Cbor::Bytes(vec![0xa0]))),
            ]),
        ),
        (uint(2), Cbor::Array(methods)),
    ]))
}

fn ble_method() -> Cbor {
    Cbor::Array(vec![
        uint(2),
        uint(1),
        Cbor::Map(vec![
            (uint(0), Cbor::Bool(false)),
            (uint(1), Cbor::Bool(true)),
            (uint(11), Cbor::Bytes(Uuid::nil().as_bytes().to_vec())),
        ]),
    ])
}

fn strict() -> EngagementParseOptions {
    EngagementParseOptions {
        connection_method_errors: ConnectionMethodErrorPolicy::Strict,
    }
}

#[test]
fn annex_d_device_engagement() {
    let bytes = hex::decode(ANNEX_D_DEVICE_ENGAGEMENT).unwrap();
    assert_eq!(bytes.len(), 116);

    let engagement = DeviceEngagement::parse(&bytes).unwrap();
    assert_eq!(engagement.version(), "1.0");
    assert_eq!(engagement.cipher_suite_version(), 1);
    assert_eq!(
        hex::encode(engagement.e_device_key_bytes()),
        ANNEX_D_E_DEVICE_KEY
    );
    assert!(engagement.origin_infos().is_empty());

    let [ConnectionMethod::Ble(ble)] = engagement.connection_methods() else {
        panic!(
            "expected a single BLE method, got {:?}",
            engagement.connection_methods()
        )
    };
    assert!(!ble.supports_peripheral_server_mode());
    assert!(ble.supports_central_client_mode());
    assert_eq!(
        ble.central_client_mode_uuid(),
        Some(&Uuid::parse_str(CENTRAL_UUID).unwrap())
    );

    assert_eq!(engagement.to_cbor_bytes().unwrap(), bytes);
}

#[test]
fn annex_d_rebuilt_from_parts() {
    let engagement = DeviceEngagement::builder(
        "1.0",
        hex::decode(ANNEX_D_E_DEVICE_KEY).unwrap(),
    )
    .with_connection_method(
        BleOptions::central_client(Uuid::parse_str(CENTRAL_UUID).unwrap()).into_method(),
    )
    .build()
    .unwrap();

    assert_eq!(
        hex::encode(engagement.to_cbor_bytes().unwrap()),
        ANNEX_D_DEVICE_ENGAGEMENT
    );
}

#[test]
fn every_member_round_trips() {
    let engagement = DeviceEngagement::builder("1.1", vec![0xa1, 0x01, 0x02])
        .with_connection_method(NfcOptions::new(255, 256).into_method())
        .with_connection_method(
            BleOptions::peripheral_server(Uuid::nil())
                .with_peripheral_server_mode_device_address(vec![0xde, 0xad, 0xbe, 0xef, 0, 1])
                .into_method(),
        )
        .with_connection_method(RestOptions::new("https://holder.example.com").into_method())
        .with_origin_info(OriginInfo::Domain(OriginInfoDomain::new(
            "https://verifier.example.com",
        )))
        .build()
        .unwrap();

    let bytes = engagement.to_cbor_bytes().unwrap();
    let parsed = DeviceEngagement::parse_with(
        &bytes,
        &strict(),
        &ConnectionMethodRegistry::default(),
    )
    .unwrap();

    assert_eq!(parsed, engagement);
    assert!(matches!(
        parsed.preferred_connection_method(),
        Some(ConnectionMethod::Nfc(_))
    ));
}

#[test]
fn server_retrieval_and_protocol_info_are_kept() {
    let web_api = Cbor::Array(vec![
        uint(1),
        Cbor::Text("https://x".into()),
        Cbor::Text("tok".into()),
    ]);
    let server_retrieval = Cbor::Map(vec![(Cbor::Text("webApi".into()), web_api)]);
    let bytes = encode(&Cbor::Map(vec![
        (uint(0), Cbor::Text("1.0".into())),
        (
            uint(1),
            Cbor::Array(vec![uint(1), Cbor::Tag(24, Box::new(Cbor::Bytes(vec![0xa0])))]),
        ),
        (uint(3), server_retrieval.clone()),
        (uint(4), Cbor::Map(vec![])),
    ]));
    assert!(hex::encode(&bytes).starts_with("a4"));

    let engagement = DeviceEngagement::parse_with(
        &bytes,
        &strict(),
        &ConnectionMethodRegistry::default(),
    )
    .unwrap();
    assert_eq!(engagement.server_retrieval_methods(), Some(&server_retrieval));
    assert_eq!(engagement.protocol_info(), Some(&Cbor::Map(vec![])));
    assert!(engagement.connection_methods().is_empty());

    assert_eq!(engagement.to_cbor_bytes().unwrap(), bytes);
}

#[test]
fn unknown_method_is_skipped_unless_strict() {
    let unknown = Cbor::Array(vec![uint(42), uint(1), Cbor::Map(vec![])]);
    let bytes = engagement_with(1, vec![unknown, ble_method()]);

    let lenient = DeviceEngagement::parse(&bytes).unwrap();
    assert_eq!(lenient.connection_methods().len(), 1);
    assert_eq!(lenient.connection_methods()[0].method_type(), 2);

    assert!(matches!(
        DeviceEngagement::parse_with(&bytes, &strict(), &ConnectionMethodRegistry::default()),
        Err(EngagementError::UnknownConnectionMethod {
            method_type: 42,
            version: 1
        })
    ));
}

#[test]
fn registered_custom_method_is_kept() {
    let custom = Cbor::Array(vec![
        uint(42),
        uint(1),
        Cbor::Map(vec![(uint(0), Cbor::Text("x".into()))]),
    ]);
    let bytes = engagement_with(1, vec![custom]);

    let mut registry = ConnectionMethodRegistry::default();
    registry.register_opaque(42, 1);
    let engagement = DeviceEngagement::parse_with(&bytes, &strict(), &registry).unwrap();

    let [ConnectionMethod::Custom(method)] = engagement.connection_methods() else {
        panic!("expected a custom method")
    };
    assert_eq!(method.method_type, 42);
    assert_eq!(engagement.to_cbor_bytes().unwrap(), bytes);
}

#[test]
fn malformed_known_method() {
    // BLE claiming central client mode without its UUID.
    let broken_ble = Cbor::Array(vec![
        uint(2),
        uint(1),
        Cbor::Map(vec![
            (uint(0), Cbor::Bool(false)),
            (uint(1), Cbor::Bool(true)),
        ]),
    ]);
    let bytes = engagement_with(1, vec![broken_ble, ble_method()]);

    assert!(matches!(
        DeviceEngagement::parse(&bytes),
        Err(EngagementError::MalformedConnectionMethod(_))
    ));

    let skip_invalid = EngagementParseOptions {
        connection_method_errors: ConnectionMethodErrorPolicy::SkipInvalid,
    };
    let engagement =
        DeviceEngagement::parse_with(&bytes, &skip_invalid, &ConnectionMethodRegistry::default())
            .unwrap();
    assert_eq!(engagement.connection_methods().len(), 1);
}

#[test]
fn unsupported_cipher_suite() {
    let bytes = engagement_with(2, vec![ble_method()]);
    assert!(matches!(
        DeviceEngagement::parse(&bytes),
        Err(EngagementError::UnsupportedSecurityVersion(2))
    ));
}

#[test]
fn missing_security() {
    let bytes = encode(&Cbor::Map(vec![(uint(0), Cbor::Text("1.0".into()))]));
    assert!(matches!(
        DeviceEngagement::parse(&bytes),
        Err(EngagementError::MalformedWireData(_))
    ));
}

#[test]
fn untagged_device_key() {
    let untagged = encode(&Cbor::Map(vec![
        (uint(0), Cbor::Text("1.0".into())),
        (uint(1), Cbor::Array(vec![uint(1), Cbor::Bytes(vec![0xa0])])),
    ]));
    let engagement = DeviceEngagement::parse(&untagged).unwrap();
    assert_eq!(engagement.e_device_key_bytes(), &[0xa0]);
    // Written back in canonical form.
    assert_eq!(
        hex::encode(engagement.to_cbor_bytes().unwrap()),
        "a20063312e30018201d81841a0"
    );

    let text_key = encode(&Cbor::Map(vec![
        (uint(0), Cbor::Text("1.0".into())),
        (uint(1), Cbor::Array(vec![uint(1), Cbor::Text("a0".into())])),
    ]));
    assert!(matches!(
        DeviceEngagement::parse(&text_key),
        Err(EngagementError::MalformedWireData(_))
    ));
}

#[test]
fn not_cbor() {
    assert!(matches!(
        DeviceEngagement::parse(&[0xff, 0x00]),
        Err(EngagementError::MalformedWireData(_))
    ));
    assert!(matches!(
        DeviceEngagement::parse(&encode(&Cbor::Array(vec![]))),
        Err(EngagementError::MalformedWireData(_))
    ));
}

#[test]
fn proximity_transcript_embeds_the_engagement() {
    let engagement = DeviceEngagement::new("1.0", vec![0xa0]).unwrap();
    let transcript = SessionTranscript::from_engagement(&engagement, vec![0xa1, 0x01, 0x02])
        .unwrap();

    assert_eq!(
        hex::encode(transcript.to_cbor_bytes().unwrap()),
        "83d8184da20063312e30018201d81841a0d81843a10102f6"
    );
}
