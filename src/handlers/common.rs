use crate::{auth::AuthUser, errors::ServiceError, services::orders::Requester, ApiResponse};
use axum::{http::StatusCode, response::Json};
use serde::Serialize;
use uuid::Uuid;
use validator::Validate;

pub type JsonResult<T> = Result<Json<ApiResponse<T>>, ServiceError>;
pub type CreatedResult<T> = Result<(StatusCode, Json<ApiResponse<T>>), ServiceError>;

pub fn success_response<T: Serialize>(data: T) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data))
}

pub fn message_response<T: Serialize>(data: T, message: &str) -> Json<ApiResponse<T>> {
    Json(ApiResponse::success(data).with_message(message))
}

pub fn created_response<T: Serialize>(
    data: T,
    message: &str,
) -> (StatusCode, Json<ApiResponse<T>>) {
    (StatusCode::CREATED, message_response(data, message))
}

/// Validate request input
pub fn validate_input<T: Validate>(input: &T) -> Result<(), ServiceError> {
    input.validate().map_err(ServiceError::from)
}

/// Path ids arrive as strings so malformed ids answer with the JSON error body.
pub fn parse_id(raw: &str, what: &str) -> Result<Uuid, ServiceError> {
    Uuid::parse_str(raw)
        .map_err(|_| ServiceError::InvalidInput(format!("{} '{}' is not a valid id", what, raw)))
}

pub fn requester(user: &AuthUser) -> Result<Requester, ServiceError> {
    Ok(Requester {
        user_id: user.user_uuid()?,
        is_admin: user.is_admin(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn malformed_ids_are_invalid_input() {
        assert_matches!(parse_id("not-a-uuid", "order"), Err(ServiceError::InvalidInput(msg)) if msg.contains("order"));
        let id = Uuid::new_v4();
        assert_eq!(parse_id(&id.to_string(), "order").unwrap(), id);
    }
}
