//! Holder-side collaborators of the matching engine and the presentment coordinator.
//!
//! Platforms provide their own [CredentialStore] and [SecureKeyUnlocker]; the in-memory
//! implementations here are meant for tests.

pub mod credential_store;
pub mod secure_key;

pub use credential_store::{CredentialStore, HeldCredential, MemoryCredentialStore};
pub use secure_key::{MemoryKeyUnlocker, ProofMaterial, SecureKeyUnlocker, UnlockError, UnlockReason};
