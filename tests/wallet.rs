//! Credentials and queries shared by the integration tests.

use mdoc_presentment::{core::dcql_query::DcqlQuery, holder::HeldCredential};
use serde_json::{json, Value};

pub const MDL_DOCTYPE: &str = "org.iso.18013.5.1.mDL";
pub const MDL_NAMESPACE: &str = "org.iso.18013.5.1";
pub const PID_VCT: &str = "https://credentials.example.com/identity_credential";

pub fn mdl(id: &str, family_name: &str, age_over_21: bool) -> HeldCredential {
    HeldCredential::mdoc(
        id,
        MDL_DOCTYPE,
        json!({
            MDL_NAMESPACE: {
                "family_name": family_name,
                "given_name": "Erika",
                "age_over_21": age_over_21
            }
        }),
    )
    .with_key_id(format!("{id}-key"))
}

pub fn pid(id: &str, family_name: &str) -> HeldCredential {
    HeldCredential::sd_jwt(
        id,
        PID_VCT,
        json!({
            "family_name": family_name,
            "address": { "locality": "Berlin", "postal_code": "10115" }
        }),
    )
    .with_key_id(format!("{id}-key"))
}

pub fn query(value: Value) -> DcqlQuery {
    serde_json::from_value(value).unwrap()
}

/// Two mDL credential queries: both need a credential of their own.
pub fn two_mdls_query() -> DcqlQuery {
    query(json!({
        "credentials": [
            {
                "id": "first",
                "format": "mso_mdoc",
                "meta": { "doctype_value": MDL_DOCTYPE },
                "claims": [{ "path": [MDL_NAMESPACE, "family_name"] }]
            },
            {
                "id": "second",
                "format": "mso_mdoc",
                "meta": { "doctype_value": MDL_DOCTYPE },
                "claims": [{ "path": [MDL_NAMESPACE, "family_name"] }]
            }
        ]
    }))
}

/// A required mDL, or else a PID, plus an optional age check.
pub fn identity_query() -> DcqlQuery {
    query(json!({
        "credentials": [
            {
                "id": "mdl",
                "format": "mso_mdoc",
                "meta": { "doctype_value": MDL_DOCTYPE },
                "claims": [
                    { "path": [MDL_NAMESPACE, "family_name"] },
                    { "path": [MDL_NAMESPACE, "given_name"] }
                ]
            },
            {
                "id": "pid",
                "format": "dc+sd-jwt",
                "meta": { "vct_values": [PID_VCT] },
                "claims": [{ "path": ["family_name"] }]
            },
            {
                "id": "age",
                "format": "mso_mdoc",
                "meta": { "doctype_value": MDL_DOCTYPE },
                "claims": [{ "path": [MDL_NAMESPACE, "age_over_21"], "values": [true] }]
            }
        ],
        "credential_sets": [
            { "options": [["mdl"], ["pid"]] },
            { "options": [["age"]], "required": false }
        ]
    }))
}
