//! Attestation credential document schema
//!
//! Per-user DeviceCheck signing material: the ES256 private key, key id and
//! team id used to mint validation JWTs, plus an optional bypass token for
//! simulators and CI. One credential per (user, team); a create for an
//! existing pair overwrites key material in place.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for attestation credentials
pub const ATTESTATION_CREDENTIAL_COLLECTION: &str = "attestation_credentials";

/// Attestation credential document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct AttestationCredentialDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Apple developer team identifier (JWT issuer)
    pub team_id: String,

    /// Apple developer key identifier (JWT kid)
    pub key_id: String,

    /// ES256 private key in PEM form
    pub private_key: String,

    /// Device token that bypasses live validation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bypass_token: Option<String>,

    /// User that owns this credential
    pub user_id: ObjectId,
}

impl AttestationCredentialDoc {
    /// Create a new credential document
    pub fn new(
        team_id: String,
        key_id: String,
        private_key: String,
        bypass_token: Option<String>,
        user_id: ObjectId,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            team_id,
            key_id,
            private_key,
            bypass_token,
            user_id,
        }
    }
}

impl IntoIndexes for AttestationCredentialDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            // One credential per (user, team); upserts key on this pair
            doc! { "user_id": 1, "team_id": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("user_team_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for AttestationCredentialDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
