use ciborium::Value as Cbor;
use url::Url;

use super::EngagementError;
use crate::core::cbor::{as_u64, get_text_key, uint};

const CAT: &str = "cat";
const TYPE: &str = "type";
const DETAILS: &str = "details";
const DOMAIN: &str = "domain";
// Earlier drafts of ISO/IEC 18013-7 put the URL directly in the origin info map.
const LEGACY_BASE_URL: &str = "baseUrl";

/// Where the engagement was delivered from, ISO/IEC 18013-7 §6.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OriginInfo {
    Domain(OriginInfoDomain),
}

impl OriginInfo {
    pub fn decode(item: &Cbor) -> Result<Self, EngagementError> {
        let (cat, type_) = discriminator(item)?;
        match (cat, type_) {
            (OriginInfoDomain::CAT, OriginInfoDomain::TYPE) => {
                OriginInfoDomain::decode(item).map(Self::Domain)
            }
            (cat, type_) => Err(EngagementError::UnknownOriginInfo { cat, type_ }),
        }
    }

    pub fn encode(&self) -> Cbor {
        match self {
            Self::Domain(domain) => domain.encode(),
        }
    }
}

/// The engagement was obtained from a web site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginInfoDomain {
    url: String,
}

impl OriginInfoDomain {
    pub const CAT: u64 = 1;
    pub const TYPE: u64 = 1;

    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn parsed_url(&self) -> Result<Url, url::ParseError> {
        self.url.parse()
    }

    /// Decode an origin info map, refusing any other `cat`/`type` than the domain one.
    pub fn decode(item: &Cbor) -> Result<Self, EngagementError> {
        let (cat, type_) = discriminator(item)?;
        if (cat, type_) != (Self::CAT, Self::TYPE) {
            return Err(malformed(format!(
                "expected cat {} and type {}, got cat {cat} and type {type_}",
                Self::CAT,
                Self::TYPE
            )));
        }
        let map = as_map(item)?;

        let url = match get_text_key(map, DETAILS) {
            Some(details) => details
                .as_map()
                .and_then(|details| get_text_key(details, DOMAIN))
                .and_then(Cbor::as_text),
            None => get_text_key(map, LEGACY_BASE_URL).and_then(Cbor::as_text),
        }
        .ok_or_else(|| malformed("missing domain"))?;

        Ok(Self::new(url))
    }

    pub fn encode(&self) -> Cbor {
        Cbor::Map(vec![
            (Cbor::Text(CAT.into()), uint(Self::CAT)),
            (Cbor::Text(TYPE.into()), uint(Self::TYPE)),
            (
                Cbor::Text(DETAILS.into()),
                Cbor::Map(vec![(Cbor::Text(DOMAIN.into()), Cbor::Text(self.url.clone()))]),
            ),
        ])
    }
}

fn as_map(item: &Cbor) -> Result<&[(Cbor, Cbor)], EngagementError> {
    item.as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed("origin info is not a map"))
}

fn discriminator(item: &Cbor) -> Result<(u64, u64), EngagementError> {
    let map = as_map(item)?;
    let cat = get_text_key(map, CAT)
        .and_then(as_u64)
        .ok_or_else(|| malformed("missing or invalid 'cat'"))?;
    let type_ = get_text_key(map, TYPE)
        .and_then(as_u64)
        .ok_or_else(|| malformed("missing or invalid 'type'"))?;
    Ok((cat, type_))
}

fn malformed(reason: impl Into<String>) -> EngagementError {
    EngagementError::MalformedOriginInfo(reason.into())
}
