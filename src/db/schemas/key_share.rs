//! Key share document schema
//!
//! Stores the server half of a split API key. The client half leaves the
//! server in the registration response and is never written anywhere.

use bson::{doc, oid::ObjectId, Document};
use mongodb::options::IndexOptions;
use serde::{Deserialize, Serialize};

use crate::db::mongo::{IntoIndexes, MutMetadata};
use crate::db::schemas::Metadata;

/// Collection name for key shares
pub const KEY_SHARE_COLLECTION: &str = "key_shares";

/// Key share document stored in MongoDB
///
/// Invariant: `server_share` alone is information-theoretically
/// insufficient to recover the secret it was split from.
#[derive(Serialize, Deserialize, Clone, Debug, Default)]
pub struct KeyShareDoc {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub _id: Option<ObjectId>,

    #[serde(default)]
    pub metadata: Metadata,

    /// Human-readable name for the key
    pub name: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Base64 server half of the split secret
    pub server_share: String,

    /// Project that owns this key share
    pub project_id: ObjectId,
}

impl KeyShareDoc {
    /// Create a new key share document
    pub fn new(
        name: String,
        description: Option<String>,
        server_share: String,
        project_id: ObjectId,
    ) -> Self {
        Self {
            _id: None,
            metadata: Metadata::new(),
            name,
            description,
            server_share,
            project_id,
        }
    }
}

impl IntoIndexes for KeyShareDoc {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(
            doc! { "project_id": 1 },
            Some(
                IndexOptions::builder()
                    .name("project_id_index".to_string())
                    .build(),
            ),
        )]
    }
}

impl MutMetadata for KeyShareDoc {
    fn mut_metadata(&mut self) -> &mut Metadata {
        &mut self.metadata
    }
}
