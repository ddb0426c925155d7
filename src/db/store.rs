//! Credential store
//!
//! `CredentialStore` is the narrow interface the proxy core (gate +
//! forwarder) consumes; `MongoStore` implements it on MongoDB and adds the
//! management operations the CRUD routes need. The core only ever sees the
//! trait, so tests drive it with in-memory fakes.

use async_trait::async_trait;
use bson::{doc, oid::ObjectId, DateTime};
use tracing::debug;

use crate::db::mongo::{MongoClient, MongoCollection};
use crate::db::schemas::{
    AttestationCredentialDoc, KeyShareDoc, ProjectDoc, UserDoc,
    ATTESTATION_CREDENTIAL_COLLECTION, KEY_SHARE_COLLECTION, PROJECT_COLLECTION, USER_COLLECTION,
};
use crate::types::{KeycleaveError, Result};

/// Store operations consumed by the attestation gate and proxy forwarder
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Look up a key share by its association id
    async fn find_key_share(&self, id: &ObjectId) -> Result<Option<KeyShareDoc>>;

    /// Resolve the user owning a project (association chain lookup)
    async fn find_project_owner(&self, project_id: &ObjectId) -> Result<Option<UserDoc>>;

    /// Look up the attestation credential for a (team, user) pair
    async fn find_attestation_credential(
        &self,
        team_id: &str,
        user_id: &ObjectId,
    ) -> Result<Option<AttestationCredentialDoc>>;

    /// Create or overwrite the credential for a (user, team) pair
    async fn upsert_attestation_credential(
        &self,
        user_id: &ObjectId,
        team_id: &str,
        key_id: &str,
        private_key: &str,
        bypass_token: Option<&str>,
    ) -> Result<AttestationCredentialDoc>;
}

/// MongoDB-backed store for all keycleave collections
#[derive(Clone)]
pub struct MongoStore {
    users: MongoCollection<UserDoc>,
    projects: MongoCollection<ProjectDoc>,
    key_shares: MongoCollection<KeyShareDoc>,
    credentials: MongoCollection<AttestationCredentialDoc>,
}

impl MongoStore {
    /// Open all collections and apply their indexes
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            users: client.collection(USER_COLLECTION).await?,
            projects: client.collection(PROJECT_COLLECTION).await?,
            key_shares: client.collection(KEY_SHARE_COLLECTION).await?,
            credentials: client.collection(ATTESTATION_CREDENTIAL_COLLECTION).await?,
        })
    }

    // =========================================================================
    // Users
    // =========================================================================

    /// Find a user by external identifier, provisioning on first sight
    pub async fn ensure_user(&self, identifier: &str, identifier_type: &str) -> Result<UserDoc> {
        if let Some(user) = self
            .users
            .find_one(doc! { "identifier": identifier })
            .await?
        {
            return Ok(user);
        }

        debug!(identifier = %identifier, "Provisioning user from identity provider");
        let mut user = UserDoc::new(identifier.to_string(), identifier_type.to_string());
        let id = self.users.insert_one(user.clone()).await?;
        user._id = Some(id);
        Ok(user)
    }

    // =========================================================================
    // Projects
    // =========================================================================

    pub async fn insert_project(&self, mut project: ProjectDoc) -> Result<ProjectDoc> {
        let id = self.projects.insert_one(project.clone()).await?;
        project._id = Some(id);
        Ok(project)
    }

    pub async fn list_projects(&self, user_id: &ObjectId) -> Result<Vec<ProjectDoc>> {
        self.projects.find_many(doc! { "user_id": user_id }).await
    }

    /// Find a project scoped to its owner
    pub async fn find_project(
        &self,
        project_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<Option<ProjectDoc>> {
        self.projects
            .find_one(doc! { "_id": project_id, "user_id": user_id })
            .await
    }

    /// Soft-delete a project and every key share it owns
    pub async fn delete_project(&self, project_id: &ObjectId, user_id: &ObjectId) -> Result<bool> {
        if self.find_project(project_id, user_id).await?.is_none() {
            return Ok(false);
        }

        self.key_shares
            .soft_delete(doc! { "project_id": project_id })
            .await?;
        self.projects
            .soft_delete(doc! { "_id": project_id, "user_id": user_id })
            .await?;
        Ok(true)
    }

    // =========================================================================
    // Key shares
    // =========================================================================

    pub async fn insert_key_share(&self, mut share: KeyShareDoc) -> Result<KeyShareDoc> {
        let id = self.key_shares.insert_one(share.clone()).await?;
        share._id = Some(id);
        Ok(share)
    }

    pub async fn list_key_shares(&self, project_id: &ObjectId) -> Result<Vec<KeyShareDoc>> {
        self.key_shares
            .find_many(doc! { "project_id": project_id })
            .await
    }

    /// Find a key share and verify the ownership chain ends at `user_id`
    pub async fn find_owned_key_share(
        &self,
        key_id: &ObjectId,
        user_id: &ObjectId,
    ) -> Result<Option<KeyShareDoc>> {
        let Some(share) = self.find_key_share(key_id).await? else {
            return Ok(None);
        };
        match self.find_project(&share.project_id, user_id).await? {
            Some(_) => Ok(Some(share)),
            None => Ok(None),
        }
    }

    /// Replace the stored server share (key rotation)
    pub async fn update_server_share(&self, key_id: &ObjectId, server_share: &str) -> Result<()> {
        self.key_shares
            .update_one(
                doc! { "_id": key_id },
                doc! { "$set": {
                    "server_share": server_share,
                    "metadata.updated_at": DateTime::now(),
                }},
            )
            .await?;
        Ok(())
    }

    pub async fn delete_key_share(&self, key_id: &ObjectId) -> Result<()> {
        self.key_shares.soft_delete(doc! { "_id": key_id }).await?;
        Ok(())
    }

    // =========================================================================
    // Attestation credentials
    // =========================================================================

    pub async fn list_attestation_credentials(
        &self,
        user_id: &ObjectId,
    ) -> Result<Vec<AttestationCredentialDoc>> {
        self.credentials.find_many(doc! { "user_id": user_id }).await
    }

    pub async fn delete_attestation_credential(
        &self,
        team_id: &str,
        user_id: &ObjectId,
    ) -> Result<bool> {
        let result = self
            .credentials
            .soft_delete(doc! { "team_id": team_id, "user_id": user_id })
            .await?;
        Ok(result.modified_count > 0)
    }
}

#[async_trait]
impl CredentialStore for MongoStore {
    async fn find_key_share(&self, id: &ObjectId) -> Result<Option<KeyShareDoc>> {
        self.key_shares.find_one(doc! { "_id": id }).await
    }

    async fn find_project_owner(&self, project_id: &ObjectId) -> Result<Option<UserDoc>> {
        let Some(project) = self.projects.find_one(doc! { "_id": project_id }).await? else {
            return Ok(None);
        };
        self.users.find_one(doc! { "_id": project.user_id }).await
    }

    async fn find_attestation_credential(
        &self,
        team_id: &str,
        user_id: &ObjectId,
    ) -> Result<Option<AttestationCredentialDoc>> {
        self.credentials
            .find_one(doc! { "team_id": team_id, "user_id": user_id })
            .await
    }

    async fn upsert_attestation_credential(
        &self,
        user_id: &ObjectId,
        team_id: &str,
        key_id: &str,
        private_key: &str,
        bypass_token: Option<&str>,
    ) -> Result<AttestationCredentialDoc> {
        let mut set = doc! {
            "key_id": key_id,
            "private_key": private_key,
            "metadata.is_deleted": false,
            "metadata.updated_at": DateTime::now(),
        };
        if let Some(token) = bypass_token {
            set.insert("bypass_token", token);
        }

        // Filter deliberately ignores soft deletion so a re-created
        // credential revives the old document instead of tripping the
        // unique (user_id, team_id) index.
        let updated = self
            .credentials
            .upsert_one(
                doc! { "user_id": user_id, "team_id": team_id },
                doc! {
                    "$set": set,
                    "$setOnInsert": {
                        "user_id": user_id,
                        "team_id": team_id,
                        "metadata.created_at": DateTime::now(),
                    },
                },
            )
            .await?;

        updated.ok_or_else(|| {
            KeycleaveError::Database("Credential upsert returned no document".into())
        })
    }
}
