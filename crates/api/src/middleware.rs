use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use teachprompt_core::UserId;

use crate::app::errors::json_error;
use crate::context::RequesterContext;

pub const USER_ID_HEADER: &str = "x-user-id";

pub async fn requester_middleware(mut req: axum::http::Request<axum::body::Body>, next: Next) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(resp) => return resp,
    };

    req.extensions_mut().insert(RequesterContext::new(user_id));
    next.run(req).await.into_response()
}

fn extract_user_id(headers: &HeaderMap) -> Result<UserId, Response> {
    let missing = || json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "missing x-user-id header");

    let header = headers.get(USER_ID_HEADER).ok_or_else(missing)?;
    let value = header.to_str().map_err(|_| missing())?.trim();
    if value.is_empty() {
        return Err(missing());
    }

    value
        .parse()
        .map_err(|_| json_error(StatusCode::UNAUTHORIZED, "unauthenticated", "x-user-id is not a valid id"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn user_id_header_is_parsed() {
        let id = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_user_id(&headers).unwrap(), id);
    }

    #[test]
    fn missing_or_garbage_header_is_rejected() {
        assert!(extract_user_id(&HeaderMap::new()).is_err());

        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert!(extract_user_id(&headers).is_err());

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("teacher-7"));
        let resp = extract_user_id(&headers).unwrap_err();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }
}
