//! This library provides the holder side of an ISO/IEC 18013-5 mdoc presentment, with
//! credential requests expressed in [DCQL].
//!
//! [DCQL]: <https://openid.net/specs/openid-4-verifiable-presentations-1_0.html#name-digital-credentials-query-l>
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use mdoc_presentment::config::Config;
//! use mdoc_presentment::core::dcql_match::DcqlMatcher;
//! use mdoc_presentment::core::dcql_query::DcqlQuery;
//! use mdoc_presentment::core::device_engagement::{
//!     ConnectionMethodRegistry, DeviceEngagement,
//! };
//! use mdoc_presentment::core::session_transcript::SessionTranscript;
//! use mdoc_presentment::presentment::PresentmentCoordinator;
//! use tokio_util::sync::CancellationToken;
//!
//! let config = Config::from_json_str(&config_json)?;
//!
//! // Read the engagement the reader scanned.
//! let engagement = DeviceEngagement::parse_with(
//!     &qr_bytes,
//!     &config.engagement,
//!     &ConnectionMethodRegistry::default(),
//! )?;
//! let transcript = SessionTranscript::from_engagement(&engagement, e_reader_key_bytes)?;
//!
//! // Evaluate the request against the credentials in the wallet.
//! let cancel = CancellationToken::new();
//! let query: DcqlQuery = serde_json::from_value(request["dcql_query"].clone())?;
//! let response = DcqlMatcher::new(config.matching)
//!     .evaluate_store(&query, &credential_store, &cancel)
//!     .await?;
//!
//! // Let the user pick, unlock the keys and collect the proofs.
//! let outcome = PresentmentCoordinator::new(
//!     response,
//!     Arc::new(secure_area),
//!     config.presentment,
//!     cancel,
//! )
//! .with_session_transcript(transcript.to_cbor_bytes()?)
//! .run(&consent_prompt)
//! .await?;
//! ```
//!
//! # Overview
//!
//! ## Engagement
//!
//! 1. *The holder shows a `DeviceEngagement`*: it carries the ephemeral device key and the
//!    transports the device listens on. [`DeviceEngagement`] encodes and decodes it.
//! 2. *Transports are pluggable*: each connection method is decoded by the
//!    [`ConnectionMethodRegistry`]. BLE, NFC, Wi-Fi Aware and REST are registered by default.
//! 3. *Both parties bind the session*: the [`SessionTranscript`] is built from the engagement,
//!    the reader key and the handover.
//!
//! [`DeviceEngagement`]: crate::core::device_engagement::DeviceEngagement
//! [`ConnectionMethodRegistry`]: crate::core::device_engagement::ConnectionMethodRegistry
//! [`SessionTranscript`]: crate::core::session_transcript::SessionTranscript
//!
//! ## Matching
//!
//! 4. *The request is parsed*: [`DcqlQuery`] checks the structure of the query when it is
//!    deserialized.
//! 5. *The query is evaluated*: [`DcqlMatcher`] finds every way the held credentials can
//!    satisfy each credential set, never using one credential twice within an alternative.
//!
//! [`DcqlQuery`]: crate::core::dcql_query::DcqlQuery
//! [`DcqlMatcher`]: crate::core::dcql_match::DcqlMatcher
//!
//! ## Presentment
//!
//! 6. *The user chooses*: a [`CredentialChooser`] picks one combination.
//! 7. *Keys are unlocked*: every bound credential needs its key unlocked through the
//!    [`SecureKeyUnlocker`].
//! 8. *Proofs are handed back*: the [`PresentmentCoordinator`] finalizes with the selection and
//!    the proof material.
//!
//! [`CredentialChooser`]: crate::presentment::CredentialChooser
//! [`SecureKeyUnlocker`]: crate::holder::SecureKeyUnlocker
//! [`PresentmentCoordinator`]: crate::presentment::PresentmentCoordinator

pub mod config;
pub mod core;
pub mod holder;
pub mod presentment;
pub mod utils;
