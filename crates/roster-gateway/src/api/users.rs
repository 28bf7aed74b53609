//! User endpoints.
//!
//! GET    /v1/users                     list users (secure)
//! GET    /v1/users?fullname=<text>     search by full name (secure)
//! GET    /v1/users/{account}           fetch one user (secure)
//! PUT    /v1/users/{account}           change password and/or full name (secure)
//! DELETE /v1/users/{account}           delete a user (secure)
//! POST   /v1/users                     create a user
//! POST   /v1/users/login               exchange credentials for a bearer token
//!
//! Mutations are announced to realtime clients as [`UserEvent`]s.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};

use roster_common::auth;
use roster_common::models::{NewUser, User, UserChanges};
use roster_common::protocol::{ErrorEnvelope, UserEvent};

use crate::api::error::ApiError;
use crate::api::Payload;
use crate::middleware::{Identity, RequestContext};
use crate::state::AppState;
use crate::store::StoreError;

const LOGIN_FAILED: &str = "login failed";

fn store_error(e: StoreError) -> ApiError {
    match e {
        StoreError::Duplicate(acct) => ApiError::conflict(format!("account {acct} already exists")),
        StoreError::Database(e) => ApiError::internal(e),
    }
}

// ── Login ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub acct: String,
    #[serde(alias = "pwd")]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

pub async fn login(
    State(state): State<AppState>,
    ctx: RequestContext,
    Payload(body): Payload<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let acct = body.acct.trim();
    let hash = state
        .users()
        .password_hash(acct)
        .await
        .map_err(store_error)?;

    let valid = match hash {
        Some(hash) => auth::verify_password(&body.password, &hash).map_err(ApiError::internal)?,
        None => false,
    };
    if !valid {
        tracing::warn!(acct = %acct, "login failed");
        state
            .registry()
            .broadcast(&ErrorEnvelope::new(ctx.request_id, LOGIN_FAILED));
        return Err(ApiError::bad_request(LOGIN_FAILED));
    }

    let token = state.authority().issue(acct).map_err(ApiError::internal)?;
    tracing::info!(acct = %acct, "user logged in");
    Ok(Json(LoginResponse { token }))
}

// ── Create ──────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateUserRequest {
    pub acct: String,
    #[serde(alias = "pwd")]
    pub password: String,
    #[serde(default)]
    pub fullname: String,
}

pub async fn create(
    State(state): State<AppState>,
    Payload(body): Payload<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), ApiError> {
    let acct = body.acct.trim();
    if acct.is_empty() || acct.contains('/') {
        return Err(ApiError::bad_request("invalid account name"));
    }
    if body.password.is_empty() {
        return Err(ApiError::bad_request("password must not be empty"));
    }

    let password_hash = auth::hash_password(&body.password).map_err(ApiError::internal)?;
    let user = state
        .users()
        .create(NewUser {
            acct: acct.to_string(),
            password_hash,
            fullname: body.fullname,
        })
        .await
        .map_err(store_error)?;

    tracing::info!(acct = %user.acct, "user created");
    state.registry().broadcast(&UserEvent::UserCreated {
        account: user.acct.clone(),
    });
    Ok((StatusCode::CREATED, Json(user)))
}

// ── Read ────────────────────────────────────────────────────────────

pub async fn list(State(state): State<AppState>) -> Result<Json<Vec<User>>, ApiError> {
    let users = state.users().list(None).await.map_err(store_error)?;
    Ok(Json(users))
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub fullname: String,
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<User>>, ApiError> {
    let users = state
        .users()
        .list(Some(&params.fullname))
        .await
        .map_err(store_error)?;
    Ok(Json(users))
}

pub async fn get(
    State(state): State<AppState>,
    Path(account): Path<String>,
) -> Result<Json<User>, ApiError> {
    state
        .users()
        .get(&account)
        .await
        .map_err(store_error)?
        .map(Json)
        .ok_or_else(ApiError::not_found)
}

// ── Update / delete ─────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    #[serde(default, alias = "pwd")]
    pub password: Option<String>,
    #[serde(default)]
    pub fullname: Option<String>,
}

pub async fn update(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(account): Path<String>,
    Payload(body): Payload<UpdateUserRequest>,
) -> Result<Json<User>, ApiError> {
    let password_hash = match body.password.as_deref() {
        Some("") => return Err(ApiError::bad_request("password must not be empty")),
        Some(password) => Some(auth::hash_password(password).map_err(ApiError::internal)?),
        None => None,
    };
    let changes = UserChanges {
        password_hash,
        fullname: body.fullname,
    };
    if changes.is_empty() {
        return Err(ApiError::bad_request("nothing to update"));
    }

    let user = state
        .users()
        .update(&account, changes)
        .await
        .map_err(store_error)?
        .ok_or_else(ApiError::not_found)?;

    tracing::info!(acct = %account, by = %caller, "user updated");
    state.registry().broadcast(&UserEvent::UserUpdated {
        account: account.clone(),
    });
    Ok(Json(user))
}

pub async fn delete(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(account): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !state.users().delete(&account).await.map_err(store_error)? {
        return Err(ApiError::not_found());
    }

    tracing::info!(acct = %account, by = %caller, "user deleted");
    state
        .registry()
        .broadcast(&UserEvent::UserDeleted { account });
    Ok(StatusCode::NO_CONTENT)
}
