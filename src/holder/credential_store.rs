use std::{fmt::Debug, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tokio::sync::RwLock;

use crate::core::credential_format::ClaimFormatDesignation;

/// A credential held by the wallet, as seen by the matching engine.
///
/// Claims are a JSON tree addressed by DCQL claims path pointers. For mso_mdoc the tree is
/// `{namespace: {element_identifier: value}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeldCredential {
    pub id: String,
    pub format: ClaimFormatDesignation,
    /// Document type (mso_mdoc).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doctype: Option<String>,
    /// Verifiable Credential Type (SD-JWT VC).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vct: Option<String>,
    pub claims: Json,
    /// Secure area key bound to the credential. `None` for credentials without holder
    /// binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl HeldCredential {
    pub fn mdoc(id: impl Into<String>, doctype: impl Into<String>, claims: Json) -> Self {
        Self {
            id: id.into(),
            format: ClaimFormatDesignation::MsoMDoc,
            doctype: Some(doctype.into()),
            vct: None,
            claims,
            key_id: None,
        }
    }

    pub fn sd_jwt(id: impl Into<String>, vct: impl Into<String>, claims: Json) -> Self {
        Self {
            id: id.into(),
            format: ClaimFormatDesignation::DcSdJwt,
            doctype: None,
            vct: Some(vct.into()),
            claims,
            key_id: None,
        }
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }
}

/// Read access to the credentials held by the wallet.
#[async_trait]
pub trait CredentialStore: Debug + Send + Sync {
    /// All held credentials, in the order candidates should be preferred (typically most
    /// recently issued first).
    async fn list_held_credentials(&self) -> Result<Vec<HeldCredential>>;
}

/// A local in-memory store. Not for production use!
#[derive(Debug, Clone, Default)]
pub struct MemoryCredentialStore {
    credentials: Arc<RwLock<Vec<HeldCredential>>>,
}

impl MemoryCredentialStore {
    pub fn new(credentials: Vec<HeldCredential>) -> Self {
        Self {
            credentials: Arc::new(RwLock::new(credentials)),
        }
    }

    pub async fn insert(&self, credential: HeldCredential) {
        self.credentials.write().await.push(credential);
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn list_held_credentials(&self) -> Result<Vec<HeldCredential>> {
        Ok(self.credentials.read().await.clone())
    }
}
