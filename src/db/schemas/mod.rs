//! Database schemas for keycleave
//!
//! MongoDB document structures for users, projects, key shares, and
//! attestation credentials.

mod attestation_credential;
mod key_share;
mod metadata;
mod project;
mod user;

pub use attestation_credential::{AttestationCredentialDoc, ATTESTATION_CREDENTIAL_COLLECTION};
pub use key_share::{KeyShareDoc, KEY_SHARE_COLLECTION};
pub use metadata::Metadata;
pub use project::{ProjectDoc, PROJECT_COLLECTION};
pub use user::{UserDoc, USER_COLLECTION};
