use anyhow::{Context, Result};
use ciborium::Value as Cbor;
use sha2::{Digest, Sha256};

use crate::core::{
    cbor::{to_bytes, wrap_encoded_cbor},
    device_engagement::DeviceEngagement,
};

/// The fixed identifier string for OpenID4VPHandover (redirect flow).
pub const OPENID4VP_HANDOVER_IDENTIFIER: &str = "OpenID4VPHandover";

/// The fixed identifier string for OpenID4VPDCAPIHandover (Digital Credentials API).
pub const DC_API_HANDOVER_IDENTIFIER: &str = "OpenID4VPDCAPIHandover";

/// How the reader and the holder were brought together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handover {
    /// QR code engagement, ISO/IEC 18013-5 §9.1.5.1. Encoded as `null`.
    Qr,
    /// OpenID4VP 1.0 §B.2.6.1 (invocation via redirects).
    OpenId4Vp(HandoverInfoHash),
    /// OpenID4VP 1.0 §B.2.6.2 (Digital Credentials API).
    DcApi(HandoverInfoHash),
}

/// SHA-256 over the CBOR encoded handover info array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverInfoHash([u8; 32]);

impl HandoverInfoHash {
    fn of(info: Vec<Cbor>) -> Result<Self> {
        let bytes = to_bytes(&Cbor::Array(info)).context("failed to encode handover info")?;
        Ok(Self(Sha256::digest(bytes).into()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

fn optional_bytes(bytes: Option<&[u8]>) -> Cbor {
    bytes.map_or(Cbor::Null, |bytes| Cbor::Bytes(bytes.to_vec()))
}

impl Handover {
    /// `OpenID4VPHandoverInfo = [clientId, nonce, jwkThumbprint / null, responseUri]`.
    ///
    /// `client_id` includes its prefix (e.g. `x509_san_dns:example.com`), and
    /// `jwk_thumbprint` is only present when the response is encrypted.
    pub fn openid4vp(
        client_id: &str,
        nonce: &str,
        jwk_thumbprint: Option<&[u8]>,
        response_uri: &str,
    ) -> Result<Self> {
        HandoverInfoHash::of(vec![
            Cbor::Text(client_id.to_owned()),
            Cbor::Text(nonce.to_owned()),
            optional_bytes(jwk_thumbprint),
            Cbor::Text(response_uri.to_owned()),
        ])
        .map(Self::OpenId4Vp)
    }

    /// `OpenID4VPDCAPIHandoverInfo = [origin, nonce, jwkThumbprint / null]`.
    ///
    /// `origin` must not carry the `origin:` prefix.
    pub fn dc_api(origin: &str, nonce: &str, jwk_thumbprint: Option<&[u8]>) -> Result<Self> {
        HandoverInfoHash::of(vec![
            Cbor::Text(origin.to_owned()),
            Cbor::Text(nonce.to_owned()),
            optional_bytes(jwk_thumbprint),
        ])
        .map(Self::DcApi)
    }

    pub fn to_cbor(&self) -> Cbor {
        let (identifier, hash) = match self {
            Self::Qr => return Cbor::Null,
            Self::OpenId4Vp(hash) => (OPENID4VP_HANDOVER_IDENTIFIER, hash),
            Self::DcApi(hash) => (DC_API_HANDOVER_IDENTIFIER, hash),
        };
        Cbor::Array(vec![
            Cbor::Text(identifier.to_owned()),
            Cbor::Bytes(hash.as_bytes().to_vec()),
        ])
    }
}

/// `SessionTranscript = [DeviceEngagementBytes / null, EReaderKeyBytes / null, Handover]`.
///
/// Its encoding is the external data of the holder's device authentication, which is why it
/// travels with every unlock request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTranscript {
    device_engagement_bytes: Option<Vec<u8>>,
    e_reader_key_bytes: Option<Vec<u8>>,
    handover: Handover,
}

impl SessionTranscript {
    /// Proximity presentment after QR engagement.
    ///
    /// `device_engagement_bytes` must be the engagement exactly as it was shown to the
    /// reader.
    pub fn proximity(device_engagement_bytes: Vec<u8>, e_reader_key_bytes: Vec<u8>) -> Self {
        Self {
            device_engagement_bytes: Some(device_engagement_bytes),
            e_reader_key_bytes: Some(e_reader_key_bytes),
            handover: Handover::Qr,
        }
    }

    /// Same as [SessionTranscript::proximity], encoding `engagement` first.
    pub fn from_engagement(
        engagement: &DeviceEngagement,
        e_reader_key_bytes: Vec<u8>,
    ) -> Result<Self> {
        let bytes = engagement
            .to_cbor_bytes()
            .context("failed to encode device engagement")?;
        Ok(Self::proximity(bytes, e_reader_key_bytes))
    }

    /// Online presentment over OpenID4VP, where the first two elements are `null`
    /// (ISO/IEC 18013-7 Annex B.4.1).
    pub fn online(handover: Handover) -> Self {
        Self {
            device_engagement_bytes: None,
            e_reader_key_bytes: None,
            handover,
        }
    }

    pub fn handover(&self) -> &Handover {
        &self.handover
    }

    pub fn to_cbor(&self) -> Cbor {
        let wrap = |bytes: &Option<Vec<u8>>| {
            bytes
                .as_deref()
                .map_or(Cbor::Null, wrap_encoded_cbor)
        };
        Cbor::Array(vec![
            wrap(&self.device_engagement_bytes),
            wrap(&self.e_reader_key_bytes),
            self.handover.to_cbor(),
        ])
    }

    pub fn to_cbor_bytes(&self) -> Result<Vec<u8>> {
        to_bytes(&self.to_cbor()).context("failed to serialize SessionTranscript to CBOR")
    }
}

/// Compute the SHA-256 JWK Thumbprint (RFC 7638) of an EC or RSA public key.
///
/// Used for the `jwkThumbprint` member of the handover info when the response is encrypted.
pub fn compute_jwk_thumbprint(jwk: &serde_json::Value) -> Result<[u8; 32]> {
    let member = |name: &str| {
        jwk.get(name)
            .and_then(serde_json::Value::as_str)
            .with_context(|| format!("JWK missing '{name}'"))
    };

    // Required members only, in lexicographic order.
    let canonical = match member("kty")? {
        "EC" => format!(
            r#"{{"crv":"{}","kty":"EC","x":"{}","y":"{}"}}"#,
            member("crv")?,
            member("x")?,
            member("y")?
        ),
        "RSA" => format!(
            r#"{{"e":"{}","kty":"RSA","n":"{}"}}"#,
            member("e")?,
            member("n")?
        ),
        kty => anyhow::bail!("unsupported key type for JWK thumbprint: {kty}"),
    };

    Ok(Sha256::digest(canonical.as_bytes()).into())
}
