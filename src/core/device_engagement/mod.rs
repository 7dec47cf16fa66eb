//! ISO/IEC 18013-5 `DeviceEngagement` codec.
//!
//! ```text
//! DeviceEngagement = {
//!   0: tstr,                          ; version
//!   1: [uint, #6.24(bstr)],           ; security: cipher suite, EDeviceKeyBytes
//!   ? 2: [+ DeviceRetrievalMethod],
//!   ? 3: ServerRetrievalMethods,      ; kept as received
//!   ? 4: ProtocolInfo,                ; kept as received
//!   ? 5: [+ OriginInfo],
//! }
//! ```
//!
//! Encoding is deterministic: members are written in key order with minimal-length heads, so
//! an engagement produced by a conformant encoder is reproduced byte for byte.

pub mod connection_method;
pub mod origin_info;

use ciborium::Value as Cbor;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::core::cbor::{
    as_u64, from_bytes, get_uint_key, to_bytes, uint, unwrap_encoded_cbor, wrap_encoded_cbor,
};

pub use connection_method::{
    BleOptions, ConnectionMethod, ConnectionMethodDecoder, ConnectionMethodOptions,
    ConnectionMethodRegistry, CustomConnectionMethod, NfcOptions, RestOptions, WifiAwareOptions,
};
pub use origin_info::{OriginInfo, OriginInfoDomain};

/// Cipher suite identifiers this implementation can establish a session with.
pub const SUPPORTED_CIPHER_SUITES: &[u64] = &[1];

const KEY_VERSION: u64 = 0;
const KEY_SECURITY: u64 = 1;
const KEY_DEVICE_RETRIEVAL_METHODS: u64 = 2;
const KEY_SERVER_RETRIEVAL_METHODS: u64 = 3;
const KEY_PROTOCOL_INFO: u64 = 4;
const KEY_ORIGIN_INFOS: u64 = 5;

#[derive(Debug, thiserror::Error)]
pub enum EngagementError {
    #[error("malformed device engagement: {0}")]
    MalformedWireData(String),
    #[error("unsupported cipher suite version {0}")]
    UnsupportedSecurityVersion(u64),
    #[error("unknown connection method (type {method_type}, version {version})")]
    UnknownConnectionMethod { method_type: u64, version: u64 },
    #[error("malformed connection method: {0}")]
    MalformedConnectionMethod(String),
    #[error("unknown origin info (cat {cat}, type {type_})")]
    UnknownOriginInfo { cat: u64, type_: u64 },
    #[error("malformed origin info: {0}")]
    MalformedOriginInfo(String),
    #[error("failed to encode device engagement: {0}")]
    Encoding(String),
}

/// What to do when a single connection method or origin info cannot be decoded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMethodErrorPolicy {
    /// Fail the whole engagement. Used for conformance testing.
    Strict,
    /// Skip entries with an unknown discriminator, fail on malformed known ones.
    #[default]
    SkipUnknown,
    /// Skip every entry that fails to decode.
    SkipInvalid,
}

impl ConnectionMethodErrorPolicy {
    fn skips(&self, error: &EngagementError) -> bool {
        use EngagementError::*;

        match self {
            Self::Strict => false,
            Self::SkipUnknown => {
                matches!(error, UnknownConnectionMethod { .. } | UnknownOriginInfo { .. })
            }
            Self::SkipInvalid => matches!(
                error,
                UnknownConnectionMethod { .. }
                    | UnknownOriginInfo { .. }
                    | MalformedConnectionMethod(_)
                    | MalformedOriginInfo(_)
            ),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct EngagementParseOptions {
    pub connection_method_errors: ConnectionMethodErrorPolicy,
}

/// The message a holder publishes (QR code, NFC) so that a reader can find it and set up a
/// session.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceEngagement {
    version: String,
    cipher_suite_version: u64,
    e_device_key_bytes: Vec<u8>,
    connection_methods: Vec<ConnectionMethod>,
    server_retrieval_methods: Option<Cbor>,
    protocol_info: Option<Cbor>,
    origin_infos: Vec<OriginInfo>,
}

impl DeviceEngagement {
    /// An engagement with cipher suite 1 and no connection methods.
    pub fn new(
        version: impl Into<String>,
        e_device_key_bytes: Vec<u8>,
    ) -> Result<Self, EngagementError> {
        Self::builder(version, e_device_key_bytes).build()
    }

    pub fn builder(
        version: impl Into<String>,
        e_device_key_bytes: Vec<u8>,
    ) -> DeviceEngagementBuilder {
        DeviceEngagementBuilder {
            version: version.into(),
            cipher_suite_version: SUPPORTED_CIPHER_SUITES[0],
            e_device_key_bytes,
            connection_methods: Vec::new(),
            server_retrieval_methods: None,
            protocol_info: None,
            origin_infos: Vec::new(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn cipher_suite_version(&self) -> u64 {
        self.cipher_suite_version
    }

    /// The encoded ephemeral device key (`EDeviceKey`), as carried inside the tag 24 wrapper.
    pub fn e_device_key_bytes(&self) -> &[u8] {
        &self.e_device_key_bytes
    }

    /// `EDeviceKeyBytes`, i.e. the key wrapped as `#6.24(bstr)`.
    pub fn e_device_key_bytes_tagged(&self) -> Cbor {
        wrap_encoded_cbor(&self.e_device_key_bytes)
    }

    /// Connection methods in the holder's order of preference.
    pub fn connection_methods(&self) -> &[ConnectionMethod] {
        &self.connection_methods
    }

    pub fn preferred_connection_method(&self) -> Option<&ConnectionMethod> {
        self.connection_methods.first()
    }

    /// `ServerRetrievalMethods` (`webApi`, `oidc`). Not used for proximity presentment, so it
    /// is carried opaquely.
    pub fn server_retrieval_methods(&self) -> Option<&Cbor> {
        self.server_retrieval_methods.as_ref()
    }

    pub fn protocol_info(&self) -> Option<&Cbor> {
        self.protocol_info.as_ref()
    }

    pub fn origin_infos(&self) -> &[OriginInfo] {
        &self.origin_infos
    }

    /// Parse with the default options and the built-in connection methods.
    pub fn parse(bytes: &[u8]) -> Result<Self, EngagementError> {
        Self::parse_with(
            bytes,
            &EngagementParseOptions::default(),
            &ConnectionMethodRegistry::default(),
        )
    }

    pub fn parse_with(
        bytes: &[u8],
        options: &EngagementParseOptions,
        registry: &ConnectionMethodRegistry,
    ) -> Result<Self, EngagementError> {
        let item = from_bytes(bytes)
            .map_err(|e| EngagementError::MalformedWireData(format!("invalid CBOR: {e}")))?;
        Self::from_cbor(&item, options, registry)
    }

    pub fn from_cbor(
        item: &Cbor,
        options: &EngagementParseOptions,
        registry: &ConnectionMethodRegistry,
    ) -> Result<Self, EngagementError> {
        let map = item
            .as_map()
            .ok_or_else(|| malformed("device engagement is not a map"))?;

        for (key, _) in map {
            if !as_u64(key).is_some_and(|key| key <= KEY_ORIGIN_INFOS) {
                debug!(?key, "ignoring unknown device engagement member");
            }
        }

        let version = get_uint_key(map, KEY_VERSION)
            .ok_or_else(|| malformed("missing version"))?
            .as_text()
            .ok_or_else(|| malformed("version is not a text string"))?;

        let security = get_uint_key(map, KEY_SECURITY).ok_or_else(|| malformed("missing security"))?;
        let (cipher_suite_version, e_device_key_bytes) = decode_security(security)?;

        let policy = options.connection_method_errors;

        let mut connection_methods = Vec::new();
        if let Some(methods) = get_uint_key(map, KEY_DEVICE_RETRIEVAL_METHODS) {
            let methods = methods
                .as_array()
                .ok_or_else(|| malformed("device retrieval methods are not an array"))?;
            for (index, method) in methods.iter().enumerate() {
                match registry.decode(method) {
                    Ok(method) => connection_methods.push(method),
                    Err(e) if policy.skips(&e) => {
                        warn!(index, error = %e, "skipping connection method")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        let server_retrieval_methods = get_uint_key(map, KEY_SERVER_RETRIEVAL_METHODS).cloned();
        let protocol_info = get_uint_key(map, KEY_PROTOCOL_INFO).cloned();

        let mut origin_infos = Vec::new();
        if let Some(infos) = get_uint_key(map, KEY_ORIGIN_INFOS) {
            let infos = infos
                .as_array()
                .ok_or_else(|| malformed("origin infos are not an array"))?;
            for (index, info) in infos.iter().enumerate() {
                match OriginInfo::decode(info) {
                    Ok(info) => origin_infos.push(info),
                    Err(e) if policy.skips(&e) => {
                        warn!(index, error = %e, "skipping origin info")
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        debug!(
            version,
            cipher_suite_version,
            connection_methods = connection_methods.len(),
            origin_infos = origin_infos.len(),
            "parsed device engagement"
        );

        Self::builder(version, e_device_key_bytes.to_vec())
            .with_cipher_suite_version(cipher_suite_version)
            .with_connection_methods(connection_methods)
            .with_server_retrieval_methods(server_retrieval_methods)
            .with_protocol_info(protocol_info)
            .with_origin_infos(origin_infos)
            .build()
    }

    pub fn to_cbor(&self) -> Cbor {
        let mut map = vec![
            (uint(KEY_VERSION), Cbor::Text(self.version.clone())),
            (
                uint(KEY_SECURITY),
                Cbor::Array(vec![
                    uint(self.cipher_suite_version),
                    self.e_device_key_bytes_tagged(),
                ]),
            ),
        ];
        if !self.connection_methods.is_empty() {
            map.push((
                uint(KEY_DEVICE_RETRIEVAL_METHODS),
                Cbor::Array(
                    self.connection_methods
                        .iter()
                        .map(ConnectionMethod::encode)
                        .collect(),
                ),
            ));
        }
        if let Some(methods) = &self.server_retrieval_methods {
            map.push((uint(KEY_SERVER_RETRIEVAL_METHODS), methods.clone()));
        }
        if let Some(protocol_info) = &self.protocol_info {
            map.push((uint(KEY_PROTOCOL_INFO), protocol_info.clone()));
        }
        if !self.origin_infos.is_empty() {
            map.push((
                uint(KEY_ORIGIN_INFOS),
                Cbor::Array(self.origin_infos.iter().map(OriginInfo::encode).collect()),
            ));
        }
        Cbor::Map(map)
    }

    /// Encode to the bytes that go into the QR code or NFC handover.
    pub fn to_cbor_bytes(&self) -> Result<Vec<u8>, EngagementError> {
        to_bytes(&self.to_cbor()).map_err(|e| EngagementError::Encoding(e.to_string()))
    }
}

fn decode_security(security: &Cbor) -> Result<(u64, &[u8]), EngagementError> {
    let [cipher_suite, key] = security.as_array().map(Vec::as_slice).unwrap_or_default() else {
        return Err(malformed("security is not a 2 element array"));
    };
    let cipher_suite =
        as_u64(cipher_suite).ok_or_else(|| malformed("cipher suite is not a uint"))?;
    if !SUPPORTED_CIPHER_SUITES.contains(&cipher_suite) {
        return Err(EngagementError::UnsupportedSecurityVersion(cipher_suite));
    }
    let key = unwrap_encoded_cbor(key)
        .ok_or_else(|| malformed("EDeviceKeyBytes is not an embedded byte string"))?;
    Ok((cipher_suite, key))
}

fn malformed(reason: impl Into<String>) -> EngagementError {
    EngagementError::MalformedWireData(reason.into())
}

#[derive(Debug, Clone)]
pub struct DeviceEngagementBuilder {
    version: String,
    cipher_suite_version: u64,
    e_device_key_bytes: Vec<u8>,
    connection_methods: Vec<ConnectionMethod>,
    server_retrieval_methods: Option<Cbor>,
    protocol_info: Option<Cbor>,
    origin_infos: Vec<OriginInfo>,
}

impl DeviceEngagementBuilder {
    pub fn with_cipher_suite_version(mut self, cipher_suite_version: u64) -> Self {
        self.cipher_suite_version = cipher_suite_version;
        self
    }

    /// Append a connection method; earlier methods are preferred.
    pub fn with_connection_method(mut self, method: ConnectionMethod) -> Self {
        self.connection_methods.push(method);
        self
    }

    pub fn with_connection_methods(
        mut self,
        methods: impl IntoIterator<Item = ConnectionMethod>,
    ) -> Self {
        self.connection_methods.extend(methods);
        self
    }

    pub fn with_server_retrieval_methods(mut self, methods: impl Into<Option<Cbor>>) -> Self {
        self.server_retrieval_methods = methods.into();
        self
    }

    pub fn with_protocol_info(mut self, protocol_info: impl Into<Option<Cbor>>) -> Self {
        self.protocol_info = protocol_info.into();
        self
    }

    pub fn with_origin_info(mut self, origin_info: OriginInfo) -> Self {
        self.origin_infos.push(origin_info);
        self
    }

    pub fn with_origin_infos(mut self, origin_infos: impl IntoIterator<Item = OriginInfo>) -> Self {
        self.origin_infos.extend(origin_infos);
        self
    }

    pub fn build(self) -> Result<DeviceEngagement, EngagementError> {
        if self.version.is_empty() {
            return Err(malformed("version is empty"));
        }
        if self.e_device_key_bytes.is_empty() {
            return Err(malformed("EDeviceKeyBytes is empty"));
        }
        if !SUPPORTED_CIPHER_SUITES.contains(&self.cipher_suite_version) {
            return Err(EngagementError::UnsupportedSecurityVersion(
                self.cipher_suite_version,
            ));
        }
        if self
            .server_retrieval_methods
            .as_ref()
            .is_some_and(|methods| methods.as_map().is_none())
        {
            return Err(malformed("server retrieval methods are not a map"));
        }
        Ok(DeviceEngagement {
            version: self.version,
            cipher_suite_version: self.cipher_suite_version,
            e_device_key_bytes: self.e_device_key_bytes,
            connection_methods: self.connection_methods,
            server_retrieval_methods: self.server_retrieval_methods,
            protocol_info: self.protocol_info,
            origin_infos: self.origin_infos,
        })
    }
}
