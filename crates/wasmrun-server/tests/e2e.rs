//! End-to-end tests for wasmrun-server.
//!
//! Each test starts a real server on an ephemeral port, backed by an
//! in-memory cache and a temporary module directory, and talks to it over
//! HTTP with reqwest.

use std::path::Path;
use std::sync::Arc;

use serde_json::{Value, json};

use wasmrun_common::{EngineConfig, ExecutionConfig};
use wasmrun_core::{ModuleInvoker, WasmEngine};
use wasmrun_loader::{FilesystemBackend, InMemoryCache, LoaderOptions, ModuleBackend, ModuleLoader};
use wasmrun_server::{AppState, TestHandle, WasmrunServer};

/// Writes `echo:` followed by the value of its only environment variable.
const ECHO_WAT: &str = r#"
(module
    (import "wasi_snapshot_preview1" "environ_sizes_get"
        (func $environ_sizes_get (param i32 i32) (result i32)))
    (import "wasi_snapshot_preview1" "environ_get"
        (func $environ_get (param i32 i32) (result i32)))
    (import "wasi_snapshot_preview1" "fd_write"
        (func $fd_write (param i32 i32 i32 i32) (result i32)))
    (memory (export "memory") 1)
    (data (i32.const 512) "echo:")

    (func (export "_start")
        (local $p i32)
        (local $end i32)
        (drop (call $environ_sizes_get (i32.const 0) (i32.const 4)))
        (drop (call $environ_get (i32.const 32) (i32.const 1024)))

        (local.set $p (i32.load (i32.const 32)))
        (block $found
            (loop $scan
                (br_if $found (i32.eq (i32.load8_u (local.get $p)) (i32.const 61)))
                (local.set $p (i32.add (local.get $p) (i32.const 1)))
                (br $scan)))
        (local.set $p (i32.add (local.get $p) (i32.const 1)))
        (local.set $end
            (i32.sub (i32.add (i32.const 1024) (i32.load (i32.const 4))) (i32.const 1)))

        ;; Two iovecs: the prefix, then the value
        (i32.store (i32.const 8) (i32.const 512))
        (i32.store (i32.const 12) (i32.const 5))
        (i32.store (i32.const 16) (local.get $p))
        (i32.store (i32.const 20) (i32.sub (local.get $end) (local.get $p)))
        (drop (call $fd_write (i32.const 1) (i32.const 8) (i32.const 2) (i32.const 0)))
    )
)
"#;

struct Fixture {
    dir: tempfile::TempDir,
    cache: Arc<InMemoryCache>,
    server: TestHandle,
    client: reqwest::Client,
}

impl Fixture {
    async fn start(modules: &[(&str, &str)]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        for (name, wat) in modules {
            std::fs::write(dir.path().join(format!("{name}.wasm")), wat).unwrap();
        }

        let cache = Arc::new(InMemoryCache::new());
        let state = state_for(dir.path(), cache.clone());
        let server = WasmrunServer::start_test(state).await.unwrap();

        Self {
            dir,
            cache,
            server,
            client: reqwest::Client::new(),
        }
    }

    fn directory(&self) -> &Path {
        self.dir.path()
    }

    async fn invoke_raw(&self, body: impl Into<reqwest::Body>) -> (u16, Value) {
        let response = self
            .client
            .post(format!("{}/invoke", self.server.url()))
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap();

        let status = response.status().as_u16();
        (status, response.json().await.unwrap())
    }

    async fn invoke(&self, body: &Value) -> (u16, Value) {
        self.invoke_raw(body.to_string()).await
    }
}

fn state_for(dir: &Path, cache: Arc<InMemoryCache>) -> AppState {
    let loader = ModuleLoader::new(
        cache,
        ModuleBackend::Filesystem(FilesystemBackend::new(dir)),
        LoaderOptions::default(),
    );
    let engine = Arc::new(WasmEngine::new(&EngineConfig::default()).unwrap());
    let invoker = ModuleInvoker::new(engine, ExecutionConfig::default());

    AppState::new(Arc::new(loader), Arc::new(invoker))
}

#[tokio::test]
async fn test_preload_then_invoke() {
    let fixture = Fixture::start(&[("hello", ECHO_WAT)]).await;

    let count = fixture
        .server
        .state()
        .loader()
        .preload(fixture.directory())
        .await
        .unwrap();
    assert_eq!(count, 1);
    assert!(fixture.cache.contains("hello"));

    let (status, body) = fixture.invoke(&json!({"module": "hello", "data": "42"})).await;

    assert_eq!(status, 200);
    assert_eq!(body, json!({"result": "echo:42"}));
    // Served from the preloaded cache entry
    assert_eq!(fixture.server.state().loader().stats().backend_fetches, 1);

    fixture.server.shutdown().await;
}

#[tokio::test]
async fn test_missing_module() {
    let fixture = Fixture::start(&[]).await;

    let (status, body) = fixture.invoke(&json!({"module": "missing"})).await;

    assert_eq!(status, 500);
    let error = body["error"].as_str().unwrap();
    assert!(error.contains("failed to load module missing"), "{error}");
    assert!(fixture.cache.is_empty());

    fixture.server.shutdown().await;
}

#[tokio::test]
async fn test_non_json_body() {
    let fixture = Fixture::start(&[]).await;

    let (status, body) = fixture.invoke_raw("this is not json").await;

    assert_eq!(status, 400);
    let error = body["error"].as_str().unwrap();
    assert!(error.starts_with("failed to parse request body"), "{error}");

    fixture.server.shutdown().await;
}

#[tokio::test]
async fn test_concurrent_cold_requests_agree() {
    let fixture = Arc::new(Fixture::start(&[("echo", ECHO_WAT)]).await);
    assert!(!fixture.cache.contains("echo"));

    let request = json!({"module": "echo", "data": "same"});
    let (first, second) = tokio::join!(fixture.invoke(&request), fixture.invoke(&request));

    assert_eq!(first.0, 200);
    assert_eq!(second.0, 200);
    assert_eq!(first.1, second.1);
    assert_eq!(first.1["result"], "echo:same");

    let fetches = fixture.server.state().loader().stats().backend_fetches;
    assert!((1..=2).contains(&fetches), "backend fetched {fetches} times");
}

#[tokio::test]
async fn test_data_defaults_to_empty() {
    let fixture = Fixture::start(&[("echo", ECHO_WAT)]).await;

    let (status, body) = fixture.invoke(&json!({"module": "echo"})).await;

    assert_eq!(status, 200);
    assert_eq!(body["result"], "echo:");

    fixture.server.shutdown().await;
}

#[tokio::test]
async fn test_health_and_ready() {
    let fixture = Fixture::start(&[]).await;

    let health = fixture
        .client
        .get(format!("{}/health", fixture.server.url()))
        .send()
        .await
        .unwrap();
    assert_eq!(health.status().as_u16(), 200);
    assert_eq!(health.text().await.unwrap(), "OK");

    let ready: Value = fixture
        .client
        .get(format!("{}/ready", fixture.server.url()))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(ready["status"], "ready");
    assert_eq!(ready["loader"]["cache_hits"], 0);

    fixture.server.shutdown().await;
}
