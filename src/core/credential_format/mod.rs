use core::fmt;
use std::{borrow::Cow, str::FromStr};

use serde::{Deserialize, Serialize};

const FORMAT_MSO_MDOC: &str = "mso_mdoc";
const FORMAT_DC_SD_JWT: &str = "dc+sd-jwt";
const FORMAT_JWT_VC_JSON: &str = "jwt_vc_json";
const FORMAT_LDP_VC: &str = "ldp_vc";

/// Credential format identifier, as used by the `format` member of a DCQL Credential Query
/// and by held credentials.
///
/// See: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#appendix-B>
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClaimFormatDesignation {
    /// The format is defined by ISO/IEC 18013-5:2021 which defines a mobile driving license
    /// (mDL) Credential in the mobile document (mdoc) format. The format can be used with any
    /// mdoc document type.
    MsoMDoc,

    /// IETF SD-JWT VC.
    DcSdJwt,

    /// W3C Verifiable Credential secured with a JWT, not using JSON-LD.
    JwtVcJson,

    /// W3C Verifiable Credential secured with a Linked Data Proof.
    LdpVc,

    /// Other format identifiers not covered by the above.
    ///
    /// The value of this variant is the identifier as received.
    Other(String),
}

impl ClaimFormatDesignation {
    pub fn from_name(name: Cow<str>) -> Self {
        match name.as_ref() {
            FORMAT_MSO_MDOC => Self::MsoMDoc,
            FORMAT_DC_SD_JWT => Self::DcSdJwt,
            FORMAT_JWT_VC_JSON => Self::JwtVcJson,
            FORMAT_LDP_VC => Self::LdpVc,
            _ => Self::Other(name.into_owned()),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::MsoMDoc => FORMAT_MSO_MDOC,
            Self::DcSdJwt => FORMAT_DC_SD_JWT,
            Self::JwtVcJson => FORMAT_JWT_VC_JSON,
            Self::LdpVc => FORMAT_LDP_VC,
            Self::Other(other) => other,
        }
    }

    /// Whether claims of this format are addressed as `[namespace, element_identifier]`.
    pub fn is_mdoc(&self) -> bool {
        matches!(self, Self::MsoMDoc)
    }
}

impl From<&str> for ClaimFormatDesignation {
    fn from(s: &str) -> Self {
        Self::from_name(Cow::Borrowed(s))
    }
}

impl From<String> for ClaimFormatDesignation {
    fn from(value: String) -> Self {
        Self::from_name(Cow::Owned(value))
    }
}

impl FromStr for ClaimFormatDesignation {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(s.into())
    }
}

impl From<ClaimFormatDesignation> for String {
    fn from(format: ClaimFormatDesignation) -> Self {
        match format {
            ClaimFormatDesignation::Other(other) => other,
            known => known.name().to_owned(),
        }
    }
}

impl fmt::Display for ClaimFormatDesignation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.name().fmt(f)
    }
}

impl Serialize for ClaimFormatDesignation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.name().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClaimFormatDesignation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        String::deserialize(deserializer).map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use serde_json::json;

    #[test]
    fn known_and_other_designations() {
        let formats: Vec<ClaimFormatDesignation> =
            serde_json::from_value(json!(["mso_mdoc", "dc+sd-jwt", "com.example.custom"]))
                .unwrap();

        assert_eq!(formats[0], ClaimFormatDesignation::MsoMDoc);
        assert_eq!(formats[1], ClaimFormatDesignation::DcSdJwt);
        assert_eq!(
            formats[2],
            ClaimFormatDesignation::Other("com.example.custom".into())
        );
        assert_eq!(
            serde_json::to_value(&formats).unwrap(),
            json!(["mso_mdoc", "dc+sd-jwt", "com.example.custom"])
        );
    }

    #[test]
    fn display_matches_wire_name() {
        assert_eq!(ClaimFormatDesignation::MsoMDoc.to_string(), "mso_mdoc");
        assert_eq!(String::from(ClaimFormatDesignation::from("x")), "x");
    }
}
