//! HTTP route table.
//!
//! Every route is declared here; the gateway validates and mounts them.

pub mod error;
pub mod socket;
pub mod users;

use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, Request};
use axum::http::Method;
use axum::Json;
use serde::de::DeserializeOwned;

use crate::gateway::Route;

use self::error::ApiError;

/// All routes served by the gateway.
pub fn routes() -> Vec<Route> {
    vec![
        Route::new("Socket", Method::GET, "/v1/socket", socket::handler),
        Route::new("GetUserList", Method::GET, "/v1/users", users::list).secure(),
        Route::new("SearchUsers", Method::GET, "/v1/users", users::search)
            .queries(&[("fullname", "{fullname}")])
            .secure(),
        Route::new("GetUser", Method::GET, "/v1/users/{account}", users::get).secure(),
        Route::new("DeleteUser", Method::DELETE, "/v1/users/{account}", users::delete).secure(),
        Route::new("UpdateUser", Method::PUT, "/v1/users/{account}", users::update).secure(),
        Route::new("CreateUser", Method::POST, "/v1/users", users::create),
        Route::new("Login", Method::POST, "/v1/users/login", users::login),
        Route::new("Health", Method::GET, "/health", health),
    ]
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// JSON body extractor whose rejections use the error envelope.
pub struct Payload<T>(pub T);

impl<S, T> FromRequest<S> for Payload<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Payload(value)),
            Err(rejection) => Err(reject(rejection)),
        }
    }
}

fn reject(rejection: JsonRejection) -> ApiError {
    tracing::debug!(error = %rejection.body_text(), "request body rejected");
    ApiError::bad_request(rejection.body_text())
}
