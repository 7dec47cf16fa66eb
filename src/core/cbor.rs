//! Helpers over [`ciborium::Value`], the structured-item model used for every wire structure
//! in this crate.

use ciborium::Value as Cbor;

/// Tag for an embedded CBOR data item (`#6.24(bstr .cbor T)`), RFC 8949 §3.4.5.1.
pub(crate) const ENCODED_CBOR_TAG: u64 = 24;

pub(crate) fn to_bytes(value: &Cbor) -> Result<Vec<u8>, ciborium::ser::Error<std::io::Error>> {
    let mut bytes = Vec::new();
    ciborium::into_writer(value, &mut bytes)?;
    Ok(bytes)
}

pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Cbor, ciborium::de::Error<std::io::Error>> {
    ciborium::from_reader(bytes)
}

pub(crate) fn uint(value: u64) -> Cbor {
    Cbor::Integer(value.into())
}

pub(crate) fn as_u64(value: &Cbor) -> Option<u64> {
    value.as_integer().and_then(|i| u64::try_from(i).ok())
}

/// Look up an entry of a CBOR map by unsigned integer key.
pub(crate) fn get_uint_key(map: &[(Cbor, Cbor)], key: u64) -> Option<&Cbor> {
    map.iter()
        .find(|(k, _)| as_u64(k) == Some(key))
        .map(|(_, v)| v)
}

/// Look up an entry of a CBOR map by text key.
pub(crate) fn get_text_key<'a>(map: &'a [(Cbor, Cbor)], key: &str) -> Option<&'a Cbor> {
    map.iter()
        .find(|(k, _)| k.as_text() == Some(key))
        .map(|(_, v)| v)
}

/// Unwrap `#6.24(bstr)`; a bare byte string is accepted as well.
pub(crate) fn unwrap_encoded_cbor(value: &Cbor) -> Option<&[u8]> {
    match value {
        Cbor::Tag(ENCODED_CBOR_TAG, inner) => inner.as_bytes().map(Vec::as_slice),
        Cbor::Bytes(bytes) => Some(bytes),
        _ => None,
    }
}

pub(crate) fn wrap_encoded_cbor(bytes: &[u8]) -> Cbor {
    Cbor::Tag(ENCODED_CBOR_TAG, Box::new(Cbor::Bytes(bytes.to_vec())))
}
