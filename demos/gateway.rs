//! API gateway demo: rate limiting in front of cached handlers.
//!
//! ```bash
//! RUST_LOG=info cargo run --example gateway
//! curl http://127.0.0.1:3000/api/exercises/1
//! curl http://127.0.0.1:3000/stats
//! curl -X POST http://127.0.0.1:3000/cache/exercises/invalidate
//! ```

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use cache_gate::backend::InMemoryBackend;
use cache_gate::repository::{DataRepository, InMemoryRepository, Record};
use cache_gate::{CacheService, MonitorConfig, OperationConfig, RateLimitConfig, RateLimiter};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct AppState {
    cache: CacheService<InMemoryBackend>,
    gateway_limit: Arc<RateLimiter<InMemoryBackend>>,
    auth_limit: Arc<RateLimiter<InMemoryBackend>>,
    repository: Arc<InMemoryRepository>,
}

fn seed_repository() -> InMemoryRepository {
    let mut repo = InMemoryRepository::new();
    let exercises = [
        ("1", "Back Squat", "legs"),
        ("2", "Bench Press", "chest"),
        ("3", "Deadlift", "posterior chain"),
        ("4", "Pull-up", "back"),
    ];
    for (id, name, muscle_group) in exercises {
        repo.insert(
            "exercises",
            Record::new(id, json!({"id": id, "name": name, "muscleGroup": muscle_group})),
        );
    }
    repo.insert(
        "users",
        Record::new("u1", json!({"units": "metric", "goal": "strength"})),
    );
    repo
}

/// Client identity for rate limiting: first `X-Forwarded-For` hop, else a
/// shared bucket.
fn client_key(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "anonymous".to_string())
}

fn too_many_requests(retry_after_secs: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "retryAfter": retry_after_secs,
        })),
    )
        .into_response();
    if let Ok(value) = HeaderValue::from_str(&retry_after_secs.to_string()) {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

async fn gateway_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let decision = state.gateway_limit.consume(&client_key(request.headers())).await;
    if !decision.allowed {
        return too_many_requests(decision.retry_after_secs);
    }
    next.run(request).await
}

async fn auth_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let decision = state.auth_limit.consume(&client_key(request.headers())).await;
    if !decision.allowed {
        return too_many_requests(decision.retry_after_secs);
    }
    next.run(request).await
}

/// Cache-aside read of one exercise.
async fn get_exercise(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let repository = state.repository.clone();
    let lookup = id.clone();

    let result = state
        .cache
        .get_or_compute(
            "exercises",
            &id,
            || async move {
                // simulated query latency
                tokio::time::sleep(Duration::from_millis(25)).await;
                let records = repository.load("exercises", None).await?;
                Ok::<_, cache_gate::Error>(
                    records
                        .into_iter()
                        .find(|r| r.id == lookup)
                        .map(|r| r.data)
                        .unwrap_or(Value::Null),
                )
            },
            OperationConfig::default().with_ttl(Duration::from_secs(7200)),
        )
        .await;

    match result {
        Ok(Value::Null) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "Exercise not found"})),
        )
            .into_response(),
        Ok(exercise) => (StatusCode::OK, Json(exercise)).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Database error: {}", e)})),
        )
            .into_response(),
    }
}

async fn login() -> Json<Value> {
    Json(json!({"status": "ok"}))
}

async fn stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "cache": state.cache.stats() }))
}

async fn health(State(state): State<AppState>) -> Response {
    let report = state.cache.health_check().await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report)).into_response()
}

async fn invalidate(Path(namespace): Path<String>, State(state): State<AppState>) -> Response {
    match state.cache.invalidate_namespace(&namespace).await {
        Ok(removed) => Json(json!({"namespace": namespace, "invalidated": removed})).into_response(),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"error": e.to_string()})),
        )
            .into_response(),
    }
}

async fn warm(State(state): State<AppState>) -> Json<Value> {
    Json(json!({ "reports": state.cache.warm_all().await }))
}

#[tokio::main]
async fn main() {
    // Initialize logging
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init()
        .ok();

    let backend = InMemoryBackend::new();
    let repository = Arc::new(seed_repository());

    let cache = CacheService::builder(backend)
        .repository(repository.clone())
        .build();

    let reports = cache.warm_all().await;
    for report in &reports {
        println!(
            "warmed {}: {} written, {} failed",
            report.namespace, report.written, report.failed
        );
    }
    let _monitor = cache.spawn_monitor(MonitorConfig::default());

    let state = AppState {
        gateway_limit: Arc::new(cache.rate_limiter(RateLimitConfig::gateway())),
        auth_limit: Arc::new(cache.rate_limiter(RateLimitConfig::auth())),
        cache,
        repository,
    };

    let auth_routes = Router::new()
        .route("/api/auth/login", post(login))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth_limit));

    let app = Router::new()
        .route("/api/exercises/{id}", get(get_exercise))
        .merge(auth_routes)
        .layer(middleware::from_fn_with_state(state.clone(), gateway_limit))
        .route("/stats", get(stats))
        .route("/health", get(health))
        .route("/cache/{namespace}/invalidate", post(invalidate))
        .route("/cache/warm", post(warm))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:3000")
        .await
        .expect("Failed to bind port 3000");

    println!("Server running on http://127.0.0.1:3000");
    println!("Cached endpoint: http://127.0.0.1:3000/api/exercises/1");
    println!("Stats endpoint: http://127.0.0.1:3000/stats");
    println!("Health check: http://127.0.0.1:3000/health");

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
