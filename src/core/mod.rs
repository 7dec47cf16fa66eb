pub(crate) mod cbor;
pub mod credential_format;
pub mod dcql_match;
pub mod dcql_query;
pub mod device_engagement;
pub mod session_transcript;
