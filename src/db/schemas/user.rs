//! User document schema
//!
//! Users exist only as owners of projects and attestation credentials.
//! Authentication of the human operator happens at an external identity
//! provider; we store the identifier it hands us and nothing else.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for users
pub const USER_COLLECTION: &str = "users";

/// User document stored in MongoDB
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct UserDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Subject identifier issued by the external identity provider
    pub identifier: String,

    /// Type of identifier (subject, email, ...)
    #[serde(default = "default_identifier_type")]
    pub identifier_type: String,
}

fn default_identifier_type() -> String {
    "subject".to_string()
}

impl UserDoc {
    /// Create a new user document
    pub fn new(identifier: String, identifier_type: String) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            identifier,
            identifier_type,
        }
    }
}

impl IntoIndexes for UserDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "identifier": 1 },
            Some(
                IndexOptions::builder()
                    .unique(true)
                    .name("identifier_unique".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for UserDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
