//! Extractors that deserialize and validate request input in one step, reporting failures
//! with the shared error body.

use std::fmt::Display;

use axum::{
    Json,
    extract::{FromRequest, FromRequestParts, Query, Request},
    http::request::Parts,
};
use axum_valid::{Valid, ValidRejection, ValidationRejection};
use serde::de::DeserializeOwned;
use validator::Validate;

use crate::error::AppError;

/// JSON body that passed its `validator` rules.
pub struct ValidatedJson<T>(pub T);

impl<T, S> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Valid(Json(value)) = Valid::<Json<T>>::from_request(req, state)
            .await
            .map_err(into_app_error)?;
        Ok(Self(value))
    }
}

/// Query string that passed its `validator` rules.
pub struct ValidatedQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ValidatedQuery<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Valid(Query(value)) = Valid::<Query<T>>::from_request_parts(parts, state)
            .await
            .map_err(into_app_error)?;
        Ok(Self(value))
    }
}

fn into_app_error<E: Display>(rejection: ValidRejection<E>) -> AppError {
    match rejection {
        ValidationRejection::Valid(errors) => errors.into(),
        ValidationRejection::Inner(inner) => AppError::BadRequest(inner.to_string()),
    }
}
