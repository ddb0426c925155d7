//! Management routes under /me
//!
//! CRUD surface for projects, key shares, and DeviceCheck credentials.
//! Every route requires an identity-provider bearer token; all documents
//! are scoped to the authenticated caller. The key registration and
//! rotation routes are where secrets get split; the client share appears
//! in exactly one response and is never stored.

use bson::oid::ObjectId;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

use crate::db::schemas::{KeyShareDoc, ProjectDoc, UserDoc};
use crate::db::{CredentialStore, MongoStore};
use crate::identity;
use crate::keysplit;
use crate::server::AppState;
use crate::types::KeycleaveError;

use super::{error_response, json_response, not_found_response};

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    pub id: String,
    pub identifier: String,
}

#[derive(Debug, Deserialize)]
pub struct CreateProjectRequest {
    pub name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectResponse {
    pub id: String,
    pub name: String,
    pub keys: Vec<KeyShareResponse>,
}

#[derive(Debug, Deserialize)]
pub struct CreateKeyRequest {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// The full API key; split immediately, never stored whole
    pub secret: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyShareResponse {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Returned once at registration; the client share is not recoverable later
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyCreatedResponse {
    pub id: String,
    pub name: String,
    pub client_share: String,
}

#[derive(Debug, Deserialize)]
pub struct RotateKeyRequest {
    pub secret: String,
}

#[derive(Debug, Deserialize)]
pub struct CredentialUpsertRequest {
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(rename = "keyID")]
    pub key_id: String,
    #[serde(rename = "privateKey")]
    pub private_key: String,
    #[serde(rename = "bypassToken", default)]
    pub bypass_token: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CredentialResponse {
    #[serde(rename = "teamID")]
    pub team_id: String,
    #[serde(rename = "keyID")]
    pub key_id: String,
    #[serde(rename = "bypassToken", skip_serializing_if = "Option::is_none")]
    pub bypass_token: Option<String>,
}

// =============================================================================
// Dispatch
// =============================================================================

/// Handle all /me/* management requests
pub async fn handle_account_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
    path: &str,
) -> Response<Full<Bytes>> {
    let Some(store) = &state.store else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            "store_unavailable",
            "Account management requires a database connection",
        );
    };

    let (parts, body) = req.into_parts();

    let user = match identity::authenticate(store, &state.args.idp_secret(), &parts.headers).await {
        Ok(user) => user,
        Err(e) => {
            let code = match e {
                identity::IdentityError::MissingToken => "missing_token",
                identity::IdentityError::InvalidToken(_) => "invalid_token",
                identity::IdentityError::Store(_) => "store_error",
            };
            return error_response(e.status(), code, &e.to_string());
        }
    };
    let Some(user_id) = user._id else {
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "store_error",
            "User record has no id",
        );
    };

    let body = match body.collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            error!("Account request body error: {}", e);
            return error_response(
                StatusCode::BAD_REQUEST,
                "body_error",
                "Failed to read request body",
            );
        }
    };

    let rest = path.strip_prefix("/me").unwrap_or("");
    let segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();

    match (parts.method.clone(), segments.as_slice()) {
        (Method::GET, []) => current_user(&user),

        (Method::GET, ["projects"]) => list_projects(store, &user_id).await,
        (Method::POST, ["projects"]) => create_project(store, &user_id, &body).await,
        (Method::GET, ["projects", id]) => get_project(store, &user_id, id).await,
        (Method::DELETE, ["projects", id]) => delete_project(store, &user_id, id).await,

        (Method::GET, ["projects", id, "keys"]) => list_keys(store, &user_id, id).await,
        (Method::POST, ["projects", id, "keys"]) => {
            create_key(store, &user_id, id, &body).await
        }
        (Method::DELETE, ["keys", id]) => delete_key(store, &user_id, id).await,
        (Method::POST, ["keys", id, "rotate"]) => rotate_key(store, &user_id, id, &body).await,

        (Method::GET, ["device-check"]) => list_credentials(store, &user_id).await,
        (Method::POST, ["device-check"]) => upsert_credential(store, &user_id, &body).await,
        (Method::GET, ["device-check", team_id]) => {
            get_credential(store, &user_id, team_id).await
        }
        (Method::DELETE, ["device-check", team_id]) => {
            delete_credential(store, &user_id, team_id).await
        }

        _ => not_found_response(path),
    }
}

// =============================================================================
// Handlers
// =============================================================================

fn current_user(user: &UserDoc) -> Response<Full<Bytes>> {
    json_response(
        StatusCode::OK,
        &UserResponse {
            id: user._id.map(|id| id.to_hex()).unwrap_or_default(),
            identifier: user.identifier.clone(),
        },
    )
}

async fn list_projects(store: &MongoStore, user_id: &ObjectId) -> Response<Full<Bytes>> {
    let projects = match store.list_projects(user_id).await {
        Ok(projects) => projects,
        Err(e) => return store_failure(e),
    };

    let mut out = Vec::with_capacity(projects.len());
    for project in projects {
        match project_response(store, project).await {
            Ok(response) => out.push(response),
            Err(e) => return store_failure(e),
        }
    }

    json_response(StatusCode::OK, &out)
}

async fn create_project(
    store: &MongoStore,
    user_id: &ObjectId,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let request: CreateProjectRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return invalid_json(e),
    };

    let project = match store
        .insert_project(ProjectDoc::new(request.name, *user_id))
        .await
    {
        Ok(project) => project,
        Err(e) => return store_failure(e),
    };

    json_response(
        StatusCode::OK,
        &ProjectResponse {
            id: project._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: project.name,
            keys: Vec::new(),
        },
    )
}

async fn get_project(store: &MongoStore, user_id: &ObjectId, id: &str) -> Response<Full<Bytes>> {
    let Ok(project_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    match store.find_project(&project_id, user_id).await {
        Ok(Some(project)) => match project_response(store, project).await {
            Ok(response) => json_response(StatusCode::OK, &response),
            Err(e) => store_failure(e),
        },
        Ok(None) => not_found_response(id),
        Err(e) => store_failure(e),
    }
}

async fn delete_project(store: &MongoStore, user_id: &ObjectId, id: &str) -> Response<Full<Bytes>> {
    let Ok(project_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    match store.delete_project(&project_id, user_id).await {
        Ok(true) => {
            info!(project_id = %project_id, "Project deleted with its key shares");
            status_only(StatusCode::ACCEPTED)
        }
        Ok(false) => not_found_response(id),
        Err(e) => store_failure(e),
    }
}

async fn list_keys(store: &MongoStore, user_id: &ObjectId, id: &str) -> Response<Full<Bytes>> {
    let Ok(project_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    match store.find_project(&project_id, user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found_response(id),
        Err(e) => return store_failure(e),
    }

    match store.list_key_shares(&project_id).await {
        Ok(shares) => {
            let out: Vec<KeyShareResponse> = shares.into_iter().map(key_response).collect();
            json_response(StatusCode::OK, &out)
        }
        Err(e) => store_failure(e),
    }
}

async fn create_key(
    store: &MongoStore,
    user_id: &ObjectId,
    id: &str,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let Ok(project_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    let request: CreateKeyRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return invalid_json(e),
    };
    if request.secret.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_secret",
            "Secret must not be empty",
        );
    }

    match store.find_project(&project_id, user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found_response(id),
        Err(e) => return store_failure(e),
    }

    // The split happens here and only here; the full secret is dropped at
    // the end of this scope
    let shares = keysplit::split(request.secret.as_bytes());

    let share = match store
        .insert_key_share(KeyShareDoc::new(
            request.name,
            request.description,
            shares.server_share,
            project_id,
        ))
        .await
    {
        Ok(share) => share,
        Err(e) => return store_failure(e),
    };

    info!(project_id = %project_id, "Key share registered");

    json_response(
        StatusCode::OK,
        &KeyCreatedResponse {
            id: share._id.map(|id| id.to_hex()).unwrap_or_default(),
            name: share.name,
            client_share: shares.client_share,
        },
    )
}

async fn delete_key(store: &MongoStore, user_id: &ObjectId, id: &str) -> Response<Full<Bytes>> {
    let Ok(key_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    match store.find_owned_key_share(&key_id, user_id).await {
        Ok(Some(_)) => {}
        Ok(None) => return not_found_response(id),
        Err(e) => return store_failure(e),
    }

    match store.delete_key_share(&key_id).await {
        Ok(()) => {
            info!(key_id = %key_id, "Key share revoked");
            status_only(StatusCode::NO_CONTENT)
        }
        Err(e) => store_failure(e),
    }
}

async fn rotate_key(
    store: &MongoStore,
    user_id: &ObjectId,
    id: &str,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let Ok(key_id) = ObjectId::parse_str(id) else {
        return not_found_response(id);
    };

    let request: RotateKeyRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return invalid_json(e),
    };
    if request.secret.is_empty() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_secret",
            "Secret must not be empty",
        );
    }

    let share = match store.find_owned_key_share(&key_id, user_id).await {
        Ok(Some(share)) => share,
        Ok(None) => return not_found_response(id),
        Err(e) => return store_failure(e),
    };

    let shares = keysplit::split(request.secret.as_bytes());
    if let Err(e) = store.update_server_share(&key_id, &shares.server_share).await {
        return store_failure(e);
    }

    info!(key_id = %key_id, "Key share rotated");

    json_response(
        StatusCode::OK,
        &KeyCreatedResponse {
            id: key_id.to_hex(),
            name: share.name,
            client_share: shares.client_share,
        },
    )
}

async fn list_credentials(store: &MongoStore, user_id: &ObjectId) -> Response<Full<Bytes>> {
    match store.list_attestation_credentials(user_id).await {
        Ok(credentials) => {
            let out: Vec<CredentialResponse> = credentials
                .into_iter()
                .map(|c| CredentialResponse {
                    team_id: c.team_id,
                    key_id: c.key_id,
                    bypass_token: c.bypass_token,
                })
                .collect();
            json_response(StatusCode::OK, &out)
        }
        Err(e) => store_failure(e),
    }
}

async fn upsert_credential(
    store: &MongoStore,
    user_id: &ObjectId,
    body: &Bytes,
) -> Response<Full<Bytes>> {
    let request: CredentialUpsertRequest = match serde_json::from_slice(body) {
        Ok(r) => r,
        Err(e) => return invalid_json(e),
    };

    // The key must parse as an ES256 signing key before we accept it
    let private_key = request.private_key.replace("\\n", "\n");
    if jsonwebtoken::EncodingKey::from_ec_pem(private_key.as_bytes()).is_err() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "invalid_private_key",
            "privateKey is not a valid ES256 PEM key",
        );
    }

    match store
        .upsert_attestation_credential(
            user_id,
            &request.team_id,
            &request.key_id,
            &private_key,
            request.bypass_token.as_deref(),
        )
        .await
    {
        Ok(credential) => {
            info!(team_id = %credential.team_id, "Attestation credential upserted");
            json_response(
                StatusCode::OK,
                &CredentialResponse {
                    team_id: credential.team_id,
                    key_id: credential.key_id,
                    bypass_token: credential.bypass_token,
                },
            )
        }
        Err(e) => store_failure(e),
    }
}

async fn get_credential(
    store: &MongoStore,
    user_id: &ObjectId,
    team_id: &str,
) -> Response<Full<Bytes>> {
    match store.find_attestation_credential(team_id, user_id).await {
        Ok(Some(credential)) => json_response(
            StatusCode::OK,
            &CredentialResponse {
                team_id: credential.team_id,
                key_id: credential.key_id,
                bypass_token: credential.bypass_token,
            },
        ),
        Ok(None) => not_found_response(team_id),
        Err(e) => store_failure(e),
    }
}

async fn delete_credential(
    store: &MongoStore,
    user_id: &ObjectId,
    team_id: &str,
) -> Response<Full<Bytes>> {
    match store.delete_attestation_credential(team_id, user_id).await {
        Ok(true) => status_only(StatusCode::ACCEPTED),
        Ok(false) => not_found_response(team_id),
        Err(e) => store_failure(e),
    }
}

// =============================================================================
// Helpers
// =============================================================================

async fn project_response(
    store: &MongoStore,
    project: ProjectDoc,
) -> crate::types::Result<ProjectResponse> {
    let project_id = project._id.unwrap_or_default();
    let keys = store
        .list_key_shares(&project_id)
        .await?
        .into_iter()
        .map(key_response)
        .collect();

    Ok(ProjectResponse {
        id: project_id.to_hex(),
        name: project.name,
        keys,
    })
}

fn key_response(share: KeyShareDoc) -> KeyShareResponse {
    KeyShareResponse {
        id: share._id.map(|id| id.to_hex()).unwrap_or_default(),
        name: share.name,
        description: share.description,
    }
}

fn status_only(status: StatusCode) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn store_failure(e: KeycleaveError) -> Response<Full<Bytes>> {
    error!("Store failure: {}", e);
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "store_error",
        "Storage operation failed",
    )
}

fn invalid_json(e: serde_json::Error) -> Response<Full<Bytes>> {
    error_response(
        StatusCode::BAD_REQUEST,
        "invalid_json",
        &format!("Invalid JSON: {}", e),
    )
}
