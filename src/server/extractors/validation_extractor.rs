use axum::Json;
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use serde::de::DeserializeOwned;
use tracing::debug;
use validator::Validate;

use crate::server::error::Error;

/// query string that has been deserialized and passed its `Validate` rules
pub struct ValidatedQuery<T>(pub T);

/// json body that has been deserialized and passed its `Validate` rules
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state)
            .await
            .map_err(|e| Error::BadRequest(e.body_text()))?;

        value.validate().map_err(|e| {
            debug!("rejected query: {}", e);
            Error::BadRequest(e.to_string())
        })?;

        Ok(Self(value))
    }
}

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = Error;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|e| Error::BadRequest(e.body_text()))?;

        value.validate().map_err(|e| {
            debug!("rejected body: {}", e);
            Error::BadRequest(e.to_string())
        })?;

        Ok(Self(value))
    }
}
