//! Device retrieval methods advertised in a device engagement.
//!
//! On the wire every method is `[type, version, options]` (ISO/IEC 18013-5 §8.2.1.1). The
//! `(type, version)` pair selects the decoder through a [`ConnectionMethodRegistry`]; the
//! built-in methods are NFC, BLE, Wi-Fi Aware and REST.

use std::collections::BTreeMap;

use ciborium::Value as Cbor;
use url::Url;
use uuid::Uuid;

use super::EngagementError;
use crate::core::cbor::{as_u64, get_uint_key, uint};

const NFC_MAX_COMMAND_DATA_LENGTH: u64 = 0;
const NFC_MAX_RESPONSE_DATA_LENGTH: u64 = 1;

const BLE_SUPPORTS_PERIPHERAL_SERVER_MODE: u64 = 0;
const BLE_SUPPORTS_CENTRAL_CLIENT_MODE: u64 = 1;
const BLE_PERIPHERAL_SERVER_MODE_UUID: u64 = 10;
const BLE_CENTRAL_CLIENT_MODE_UUID: u64 = 11;
const BLE_PERIPHERAL_SERVER_MODE_DEVICE_ADDRESS: u64 = 20;

const WIFI_AWARE_PASSPHRASE: u64 = 0;
const WIFI_AWARE_CHANNEL_INFO_OPERATING_CLASS: u64 = 1;
const WIFI_AWARE_CHANNEL_INFO_CHANNEL_NUMBER: u64 = 2;
const WIFI_AWARE_BAND_INFO: u64 = 3;

const REST_URI: u64 = 0;

/// Decodes a whole `[type, version, options]` item.
pub type ConnectionMethodDecoder = fn(&Cbor) -> Result<ConnectionMethod, EngagementError>;

/// Options of one kind of connection method, identified by its `(type, version)` pair.
pub trait ConnectionMethodOptions: Sized {
    const METHOD_TYPE: u64;
    const VERSION: u64;

    fn decode_options(options: &Cbor) -> Result<Self, EngagementError>;

    fn encode_options(&self) -> Cbor;

    fn into_method(self) -> ConnectionMethod;
}

/// A way for a reader to reach the holder device.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionMethod {
    Nfc(NfcOptions),
    Ble(BleOptions),
    WifiAware(WifiAwareOptions),
    Rest(RestOptions),
    /// A method decoded by a decoder registered at runtime.
    Custom(CustomConnectionMethod),
}

impl ConnectionMethod {
    /// Decode with the built-in methods only.
    pub fn decode(item: &Cbor) -> Result<Self, EngagementError> {
        ConnectionMethodRegistry::default().decode(item)
    }

    pub fn encode(&self) -> Cbor {
        let options = match self {
            Self::Nfc(options) => options.encode_options(),
            Self::Ble(options) => options.encode_options(),
            Self::WifiAware(options) => options.encode_options(),
            Self::Rest(options) => options.encode_options(),
            Self::Custom(custom) => custom.options.clone(),
        };
        Cbor::Array(vec![uint(self.method_type()), uint(self.version()), options])
    }

    pub fn method_type(&self) -> u64 {
        match self {
            Self::Nfc(_) => NfcOptions::METHOD_TYPE,
            Self::Ble(_) => BleOptions::METHOD_TYPE,
            Self::WifiAware(_) => WifiAwareOptions::METHOD_TYPE,
            Self::Rest(_) => RestOptions::METHOD_TYPE,
            Self::Custom(custom) => custom.method_type,
        }
    }

    pub fn version(&self) -> u64 {
        match self {
            Self::Nfc(_) => NfcOptions::VERSION,
            Self::Ble(_) => BleOptions::VERSION,
            Self::WifiAware(_) => WifiAwareOptions::VERSION,
            Self::Rest(_) => RestOptions::VERSION,
            Self::Custom(custom) => custom.version,
        }
    }
}

/// Table from `(type, version)` to decoder.
///
/// ```ignore
/// let mut registry = ConnectionMethodRegistry::default();
/// registry.register_opaque(7, 1);
/// let engagement = DeviceEngagement::parse_with(&bytes, &options, &registry)?;
/// ```
#[derive(Debug, Clone)]
pub struct ConnectionMethodRegistry {
    decoders: BTreeMap<(u64, u64), ConnectionMethodDecoder>,
}

impl ConnectionMethodRegistry {
    /// A registry without any method, not even the built-in ones.
    pub fn empty() -> Self {
        Self {
            decoders: BTreeMap::new(),
        }
    }

    /// Register a typed options implementation. Replaces any decoder already registered
    /// for the same pair.
    pub fn register<T: ConnectionMethodOptions>(&mut self) -> &mut Self {
        self.register_decoder(T::METHOD_TYPE, T::VERSION, decode_typed::<T>)
    }

    pub fn register_decoder(
        &mut self,
        method_type: u64,
        version: u64,
        decoder: ConnectionMethodDecoder,
    ) -> &mut Self {
        self.decoders.insert((method_type, version), decoder);
        self
    }

    /// Accept a method whose options are carried through without interpretation.
    pub fn register_opaque(&mut self, method_type: u64, version: u64) -> &mut Self {
        self.register_decoder(method_type, version, CustomConnectionMethod::decode)
    }

    pub fn is_registered(&self, method_type: u64, version: u64) -> bool {
        self.decoders.contains_key(&(method_type, version))
    }

    pub fn decode(&self, item: &Cbor) -> Result<ConnectionMethod, EngagementError> {
        let (method_type, version, _) = split_method(item)?;
        let decoder = self.decoders.get(&(method_type, version)).ok_or(
            EngagementError::UnknownConnectionMethod {
                method_type,
                version,
            },
        )?;
        decoder(item)
    }
}

impl Default for ConnectionMethodRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry
            .register::<NfcOptions>()
            .register::<BleOptions>()
            .register::<WifiAwareOptions>()
            .register::<RestOptions>();
        registry
    }
}

fn decode_typed<T: ConnectionMethodOptions>(
    item: &Cbor,
) -> Result<ConnectionMethod, EngagementError> {
    let (_, _, options) = split_method(item)?;
    T::decode_options(options).map(T::into_method)
}

fn split_method(item: &Cbor) -> Result<(u64, u64, &Cbor), EngagementError> {
    let [method_type, version, options] = item.as_array().map(Vec::as_slice).unwrap_or_default()
    else {
        return Err(malformed("expected a [type, version, options] array"));
    };
    let method_type = as_u64(method_type).ok_or_else(|| malformed("type is not a uint"))?;
    let version = as_u64(version).ok_or_else(|| malformed("version is not a uint"))?;
    Ok((method_type, version, options))
}

fn malformed(reason: impl Into<String>) -> EngagementError {
    EngagementError::MalformedConnectionMethod(reason.into())
}

fn options_map<'a>(options: &'a Cbor, method: &str) -> Result<&'a [(Cbor, Cbor)], EngagementError> {
    options
        .as_map()
        .map(Vec::as_slice)
        .ok_or_else(|| malformed(format!("{method} options are not a map")))
}

fn optional_bool(map: &[(Cbor, Cbor)], key: u64) -> Result<Option<bool>, EngagementError> {
    get_uint_key(map, key)
        .map(|v| {
            v.as_bool()
                .ok_or_else(|| malformed(format!("option {key} is not a bool")))
        })
        .transpose()
}

fn optional_uint(map: &[(Cbor, Cbor)], key: u64) -> Result<Option<u64>, EngagementError> {
    get_uint_key(map, key)
        .map(|v| as_u64(v).ok_or_else(|| malformed(format!("option {key} is not a uint"))))
        .transpose()
}

fn optional_bytes(map: &[(Cbor, Cbor)], key: u64) -> Result<Option<Vec<u8>>, EngagementError> {
    get_uint_key(map, key)
        .map(|v| {
            v.as_bytes()
                .cloned()
                .ok_or_else(|| malformed(format!("option {key} is not a byte string")))
        })
        .transpose()
}

fn optional_text(map: &[(Cbor, Cbor)], key: u64) -> Result<Option<String>, EngagementError> {
    get_uint_key(map, key)
        .map(|v| {
            v.as_text()
                .map(ToOwned::to_owned)
                .ok_or_else(|| malformed(format!("option {key} is not a text string")))
        })
        .transpose()
}

fn optional_uuid(map: &[(Cbor, Cbor)], key: u64) -> Result<Option<Uuid>, EngagementError> {
    optional_bytes(map, key)?
        .map(|bytes| {
            Uuid::from_slice(&bytes)
                .map_err(|_| malformed(format!("option {key} is not a 16 byte UUID")))
        })
        .transpose()
}

fn required<T>(value: Option<T>, key: u64, method: &str) -> Result<T, EngagementError> {
    value.ok_or_else(|| malformed(format!("{method} option {key} is missing")))
}

/// NFC connection options (type 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NfcOptions {
    max_command_data_length: u64,
    max_response_data_length: u64,
}

impl NfcOptions {
    pub fn new(max_command_data_length: u64, max_response_data_length: u64) -> Self {
        Self {
            max_command_data_length,
            max_response_data_length,
        }
    }

    pub fn max_command_data_length(&self) -> u64 {
        self.max_command_data_length
    }

    pub fn max_response_data_length(&self) -> u64 {
        self.max_response_data_length
    }
}

impl ConnectionMethodOptions for NfcOptions {
    const METHOD_TYPE: u64 = 1;
    const VERSION: u64 = 1;

    fn decode_options(options: &Cbor) -> Result<Self, EngagementError> {
        let map = options_map(options, "NFC")?;
        Ok(Self {
            max_command_data_length: required(
                optional_uint(map, NFC_MAX_COMMAND_DATA_LENGTH)?,
                NFC_MAX_COMMAND_DATA_LENGTH,
                "NFC",
            )?,
            max_response_data_length: required(
                optional_uint(map, NFC_MAX_RESPONSE_DATA_LENGTH)?,
                NFC_MAX_RESPONSE_DATA_LENGTH,
                "NFC",
            )?,
        })
    }

    fn encode_options(&self) -> Cbor {
        Cbor::Map(vec![
            (
                uint(NFC_MAX_COMMAND_DATA_LENGTH),
                uint(self.max_command_data_length),
            ),
            (
                uint(NFC_MAX_RESPONSE_DATA_LENGTH),
                uint(self.max_response_data_length),
            ),
        ])
    }

    fn into_method(self) -> ConnectionMethod {
        ConnectionMethod::Nfc(self)
    }
}

/// BLE connection options (type 2).
///
/// A supported mode always comes with its service UUID; [`BleOptions::new`] refuses to build
/// a value where it doesn't.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BleOptions {
    supports_peripheral_server_mode: bool,
    supports_central_client_mode: bool,
    peripheral_server_mode_uuid: Option<Uuid>,
    central_client_mode_uuid: Option<Uuid>,
    peripheral_server_mode_device_address: Option<Vec<u8>>,
}

impl BleOptions {
    pub fn new(
        supports_peripheral_server_mode: bool,
        supports_central_client_mode: bool,
        peripheral_server_mode_uuid: Option<Uuid>,
        central_client_mode_uuid: Option<Uuid>,
    ) -> Result<Self, EngagementError> {
        if supports_peripheral_server_mode && peripheral_server_mode_uuid.is_none() {
            return Err(malformed(
                "peripheral server mode is supported but its UUID is missing",
            ));
        }
        if supports_central_client_mode && central_client_mode_uuid.is_none() {
            return Err(malformed(
                "central client mode is supported but its UUID is missing",
            ));
        }
        Ok(Self {
            supports_peripheral_server_mode,
            supports_central_client_mode,
            peripheral_server_mode_uuid,
            central_client_mode_uuid,
            peripheral_server_mode_device_address: None,
        })
    }

    pub fn peripheral_server(uuid: Uuid) -> Self {
        Self {
            supports_peripheral_server_mode: true,
            supports_central_client_mode: false,
            peripheral_server_mode_uuid: Some(uuid),
            central_client_mode_uuid: None,
            peripheral_server_mode_device_address: None,
        }
    }

    pub fn central_client(uuid: Uuid) -> Self {
        Self {
            supports_peripheral_server_mode: false,
            supports_central_client_mode: true,
            peripheral_server_mode_uuid: None,
            central_client_mode_uuid: Some(uuid),
            peripheral_server_mode_device_address: None,
        }
    }

    pub fn with_peripheral_server_mode_device_address(mut self, address: Vec<u8>) -> Self {
        self.peripheral_server_mode_device_address = Some(address);
        self
    }

    pub fn supports_peripheral_server_mode(&self) -> bool {
        self.supports_peripheral_server_mode
    }

    pub fn supports_central_client_mode(&self) -> bool {
        self.supports_central_client_mode
    }

    pub fn peripheral_server_mode_uuid(&self) -> Option<&Uuid> {
        self.peripheral_server_mode_uuid.as_ref()
    }

    pub fn central_client_mode_uuid(&self) -> Option<&Uuid> {
        self.central_client_mode_uuid.as_ref()
    }

    pub fn peripheral_server_mode_device_address(&self) -> Option<&[u8]> {
        self.peripheral_server_mode_device_address.as_deref()
    }
}

impl ConnectionMethodOptions for BleOptions {
    const METHOD_TYPE: u64 = 2;
    const VERSION: u64 = 1;

    fn decode_options(options: &Cbor) -> Result<Self, EngagementError> {
        let map = options_map(options, "BLE")?;
        let ble = Self::new(
            required(
                optional_bool(map, BLE_SUPPORTS_PERIPHERAL_SERVER_MODE)?,
                BLE_SUPPORTS_PERIPHERAL_SERVER_MODE,
                "BLE",
            )?,
            required(
                optional_bool(map, BLE_SUPPORTS_CENTRAL_CLIENT_MODE)?,
                BLE_SUPPORTS_CENTRAL_CLIENT_MODE,
                "BLE",
            )?,
            optional_uuid(map, BLE_PERIPHERAL_SERVER_MODE_UUID)?,
            optional_uuid(map, BLE_CENTRAL_CLIENT_MODE_UUID)?,
        )?;
        Ok(Self {
            peripheral_server_mode_device_address: optional_bytes(
                map,
                BLE_PERIPHERAL_SERVER_MODE_DEVICE_ADDRESS,
            )?,
            ..ble
        })
    }

    fn encode_options(&self) -> Cbor {
        let mut map = vec![
            (
                uint(BLE_SUPPORTS_PERIPHERAL_SERVER_MODE),
                Cbor::Bool(self.supports_peripheral_server_mode),
            ),
            (
                uint(BLE_SUPPORTS_CENTRAL_CLIENT_MODE),
                Cbor::Bool(self.supports_central_client_mode),
            ),
        ];
        if let Some(uuid) = &self.peripheral_server_mode_uuid {
            map.push((
                uint(BLE_PERIPHERAL_SERVER_MODE_UUID),
                Cbor::Bytes(uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(uuid) = &self.central_client_mode_uuid {
            map.push((
                uint(BLE_CENTRAL_CLIENT_MODE_UUID),
                Cbor::Bytes(uuid.as_bytes().to_vec()),
            ));
        }
        if let Some(address) = &self.peripheral_server_mode_device_address {
            map.push((
                uint(BLE_PERIPHERAL_SERVER_MODE_DEVICE_ADDRESS),
                Cbor::Bytes(address.clone()),
            ));
        }
        Cbor::Map(map)
    }

    fn into_method(self) -> ConnectionMethod {
        ConnectionMethod::Ble(self)
    }
}

/// Wi-Fi Aware connection options (type 3). Every member is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WifiAwareOptions {
    pub passphrase: Option<String>,
    pub channel_info_operating_class: Option<u64>,
    pub channel_info_channel_number: Option<u64>,
    pub band_info: Option<Vec<u8>>,
}

impl ConnectionMethodOptions for WifiAwareOptions {
    const METHOD_TYPE: u64 = 3;
    const VERSION: u64 = 1;

    fn decode_options(options: &Cbor) -> Result<Self, EngagementError> {
        let map = options_map(options, "Wi-Fi Aware")?;
        Ok(Self {
            passphrase: optional_text(map, WIFI_AWARE_PASSPHRASE)?,
            channel_info_operating_class: optional_uint(
                map,
                WIFI_AWARE_CHANNEL_INFO_OPERATING_CLASS,
            )?,
            channel_info_channel_number: optional_uint(map, WIFI_AWARE_CHANNEL_INFO_CHANNEL_NUMBER)?,
            band_info: optional_bytes(map, WIFI_AWARE_BAND_INFO)?,
        })
    }

    fn encode_options(&self) -> Cbor {
        let mut map = Vec::new();
        if let Some(passphrase) = &self.passphrase {
            map.push((uint(WIFI_AWARE_PASSPHRASE), Cbor::Text(passphrase.clone())));
        }
        if let Some(class) = self.channel_info_operating_class {
            map.push((uint(WIFI_AWARE_CHANNEL_INFO_OPERATING_CLASS), uint(class)));
        }
        if let Some(channel) = self.channel_info_channel_number {
            map.push((uint(WIFI_AWARE_CHANNEL_INFO_CHANNEL_NUMBER), uint(channel)));
        }
        if let Some(band) = &self.band_info {
            map.push((uint(WIFI_AWARE_BAND_INFO), Cbor::Bytes(band.clone())));
        }
        Cbor::Map(map)
    }

    fn into_method(self) -> ConnectionMethod {
        ConnectionMethod::WifiAware(self)
    }
}

/// REST (HTTP) connection options (type 4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestOptions {
    uri: String,
}

impl RestOptions {
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn parsed_uri(&self) -> Result<Url, url::ParseError> {
        self.uri.parse()
    }
}

impl ConnectionMethodOptions for RestOptions {
    const METHOD_TYPE: u64 = 4;
    const VERSION: u64 = 1;

    fn decode_options(options: &Cbor) -> Result<Self, EngagementError> {
        let map = options_map(options, "REST")?;
        Ok(Self {
            uri: required(optional_text(map, REST_URI)?, REST_URI, "REST")?,
        })
    }

    fn encode_options(&self) -> Cbor {
        Cbor::Map(vec![(uint(REST_URI), Cbor::Text(self.uri.clone()))])
    }

    fn into_method(self) -> ConnectionMethod {
        ConnectionMethod::Rest(self)
    }
}

/// A connection method outside the built-in set, with its options kept verbatim.
#[derive(Debug, Clone, PartialEq)]
pub struct CustomConnectionMethod {
    pub method_type: u64,
    pub version: u64,
    pub options: Cbor,
}

impl CustomConnectionMethod {
    /// A [`ConnectionMethodDecoder`] that keeps the options item as received.
    pub fn decode(item: &Cbor) -> Result<ConnectionMethod, EngagementError> {
        let (method_type, version, options) = split_method(item)?;
        Ok(ConnectionMethod::Custom(Self {
            method_type,
            version,
            options: options.clone(),
        }))
    }
}
