//! HTTP response construction.
//!
//! [`ApiResponse`] is the single response shape handlers return: a status,
//! headers, and a body, with helpers for JSON payloads and error envelopes.

use axum::body::Body;
use axum::http::{HeaderName, HeaderValue, Response, StatusCode};
use axum::response::IntoResponse;
use serde::Serialize;

/// Handler response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers as key-value pairs
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: Vec<u8>,
}

impl ApiResponse {
    /// Create a simple text response.
    pub fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            headers: vec![(
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string(),
            )],
            body: body.as_bytes().to_vec(),
        }
    }

    /// Create a JSON response by serializing `value`.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                headers: vec![("content-type".to_string(), "application/json".to_string())],
                body,
            },
            Err(e) => Self::error(500, &format!("failed to encode response: {e}")),
        }
    }

    /// Create an error response with body `{"error": message}`.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self {
            status,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body: body.into_bytes(),
        }
    }

    /// Convert to Axum response.
    ///
    /// Headers that are not valid HTTP are dropped.
    pub fn into_axum_response(self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() =
            StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        for (name, value) in &self.headers {
            if let (Ok(name), Ok(value)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                response.headers_mut().append(name, value);
            }
        }

        response
    }
}

impl IntoResponse for ApiResponse {
    fn into_response(self) -> axum::response::Response {
        self.into_axum_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_response() {
        let resp = ApiResponse::text(200, "OK");
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"OK");
        assert_eq!(
            resp.headers[0],
            (
                "content-type".to_string(),
                "text/plain; charset=utf-8".to_string()
            )
        );
    }

    #[test]
    fn test_json_response() {
        let resp = ApiResponse::json(200, &serde_json::json!({ "result": "42" }));
        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, br#"{"result":"42"}"#);
        assert_eq!(
            resp.headers[0],
            ("content-type".to_string(), "application/json".to_string())
        );
    }

    #[test]
    fn test_error_response_escapes_message() {
        let resp = ApiResponse::error(500, r#"failed to load module "x""#);
        let body: serde_json::Value = serde_json::from_slice(&resp.body).unwrap();
        assert_eq!(body["error"], r#"failed to load module "x""#);
    }

    #[test]
    fn test_into_axum_response() {
        let mut resp = ApiResponse::error(400, "bad");
        resp.headers.push(("bad header".to_string(), "dropped".to_string()));
        let axum_resp = resp.into_axum_response();

        assert_eq!(axum_resp.status(), StatusCode::BAD_REQUEST);
        assert_eq!(axum_resp.headers().len(), 1);
    }

    #[test]
    fn test_invalid_status_becomes_500() {
        let axum_resp = ApiResponse::text(1000, "?").into_axum_response();
        assert_eq!(axum_resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
