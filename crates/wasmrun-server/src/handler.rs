//! Request handlers.
//!
//! `POST /invoke` resolves the named module through the loader, runs it
//! with the request payload, and returns its stdout.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use bytes::Bytes;
use tracing::{error, info, instrument, warn};

use crate::request::{InvokeRequest, InvokeResponse};
use crate::response::ApiResponse;
use crate::state::AppState;

/// Invoke a module.
///
/// - `400` if the body is not a JSON [`InvokeRequest`]
/// - `500` if the module cannot be loaded or fails to run
/// - `200 {"result": ...}` otherwise
#[instrument(skip_all, fields(module = tracing::field::Empty))]
pub async fn invoke(State(state): State<AppState>, body: Bytes) -> ApiResponse {
    let request = match InvokeRequest::from_slice(&body) {
        Ok(request) => request,
        Err(e) => {
            warn!(error = %e, "Rejected request body");
            return ApiResponse::error(400, &format!("failed to parse request body: {e}"));
        }
    };
    tracing::Span::current().record("module", request.module.as_str());

    let module = match state.loader().load(&request.module).await {
        Ok(module) => module,
        Err(e) => {
            error!(error = %e, "Module load failed");
            return ApiResponse::error(500, &e.to_string());
        }
    };

    match state
        .invoker()
        .invoke_named(module.name(), module.bytes(), &request.data)
        .await
    {
        Ok(output) => {
            info!(output_len = output.len(), "Request completed");
            ApiResponse::json(200, &InvokeResponse::from_output(&output))
        }
        Err(e) => {
            let message = format!("failed to invoke module {}: {e}", module.name());
            error!(error = %e, "Module invocation failed");
            ApiResponse::error(500, &message)
        }
    }
}

/// Health check handler.
///
/// Returns 200 OK if the server is running.
pub async fn health_check() -> ApiResponse {
    ApiResponse::text(200, "OK")
}

/// Readiness check handler.
///
/// Reports loader counters and the number of memoised compiled modules.
pub async fn readiness_check(State(state): State<AppState>) -> impl IntoResponse {
    let body = serde_json::json!({
        "status": "ready",
        "loader": state.loader().stats(),
        "compiled_modules": state.invoker().compiled_count(),
    });

    (StatusCode::OK, axum::Json(body))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::state_for;

    const HELLO_WAT: &str = r#"
        (module
            (import "wasi_snapshot_preview1" "fd_write"
                (func $fd_write (param i32 i32 i32 i32) (result i32)))
            (memory (export "memory") 1)
            (data (i32.const 64) "hi")
            (func (export "_start")
                (i32.store (i32.const 0) (i32.const 64))
                (i32.store (i32.const 4) (i32.const 2))
                (drop (call $fd_write (i32.const 1) (i32.const 0) (i32.const 1) (i32.const 8)))
            )
        )
    "#;

    fn body_json(resp: &ApiResponse) -> serde_json::Value {
        serde_json::from_slice(&resp.body).unwrap()
    }

    #[tokio::test]
    async fn test_invoke_success() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("hi.wasm"), HELLO_WAT).unwrap();
        let state = state_for(dir.path());

        let resp = invoke(State(state), Bytes::from_static(br#"{"module":"hi"}"#)).await;

        assert_eq!(resp.status, 200);
        assert_eq!(body_json(&resp)["result"], "hi");
    }

    #[tokio::test]
    async fn test_invoke_bad_body() {
        let dir = tempfile::tempdir().unwrap();
        let resp = invoke(State(state_for(dir.path())), Bytes::from_static(b"{not json")).await;

        assert_eq!(resp.status, 400);
        let error = body_json(&resp)["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("failed to parse request body: "));
    }

    #[tokio::test]
    async fn test_invoke_missing_module() {
        let dir = tempfile::tempdir().unwrap();
        let resp = invoke(
            State(state_for(dir.path())),
            Bytes::from_static(br#"{"module":"missing"}"#),
        )
        .await;

        assert_eq!(resp.status, 500);
        let error = body_json(&resp)["error"].as_str().unwrap().to_string();
        assert!(error.contains("failed to load module missing"));
    }

    #[tokio::test]
    async fn test_invoke_failing_module() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("trap.wasm"),
            r#"(module (func (export "_start") unreachable))"#,
        )
        .unwrap();

        let resp = invoke(
            State(state_for(dir.path())),
            Bytes::from_static(br#"{"module":"trap"}"#),
        )
        .await;

        assert_eq!(resp.status, 500);
        let error = body_json(&resp)["error"].as_str().unwrap().to_string();
        assert!(error.starts_with("failed to invoke module trap: "), "{error}");
    }

    #[tokio::test]
    async fn test_health_check_is_plain_text() {
        let resp = health_check().await;

        assert_eq!(resp.status, 200);
        assert_eq!(resp.body, b"OK");
        assert_eq!(resp.headers[0].1, "text/plain; charset=utf-8");
    }
}
