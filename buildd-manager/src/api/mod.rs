//! API Module
//!
//! Read-only HTTP status API of the manager.

pub mod builder;
pub mod error;
pub mod health;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::repository::Repositories;

/// Create the status router
pub fn create_router(repos: Repositories) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Builder endpoints
        .route("/api/builders", get(builder::list_builders))
        .route("/api/builders/{name}", get(builder::get_builder))
        .with_state(repos)
        .layer(TraceLayer::new_for_http())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::MemoryStore;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use buildd_core::domain::builder::Builder;
    use buildd_core::domain::job::{BuildQueue, BuildStatus, JobKind};
    use buildd_core::dto::builder::BuilderSummary;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn router() -> (Arc<MemoryStore>, Router) {
        let store = Arc::new(MemoryStore::new());
        store.add_builder(Builder::new("bob", "http://bob:8221"));
        store.add_builder(Builder::new("frog", "http://frog:8221").with_manual(true));
        (store.clone(), create_router(Repositories::from_store(store)))
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, Vec<u8>) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_health() {
        let (_, router) = router();
        let (status, body) = get(router, "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, b"OK");
    }

    #[tokio::test]
    async fn test_list_builders() {
        let (store, router) = router();
        let mut job = BuildQueue::new(JobKind::BinaryPackageBuild, "hello_1.0");
        job.builder = Some("bob".into());
        job.status = BuildStatus::Building;
        store.add_job(job);

        let (status, body) = get(router, "/api/builders").await;
        assert_eq!(status, StatusCode::OK);
        let builders: Vec<BuilderSummary> = serde_json::from_slice(&body).unwrap();
        assert_eq!(builders.len(), 2);
        assert_eq!(builders[0].name, "bob");
        assert_eq!(builders[0].current_job.as_deref(), Some("hello_1.0"));
        assert_eq!(builders[0].current_status, Some(BuildStatus::Building));
        assert!(builders[1].manual);
    }

    #[tokio::test]
    async fn test_get_builder() {
        let (_, router) = router();
        let (status, body) = get(router.clone(), "/api/builders/frog").await;
        assert_eq!(status, StatusCode::OK);
        let frog: BuilderSummary = serde_json::from_slice(&body).unwrap();
        assert_eq!(frog.name, "frog");
        assert!(frog.current_job.is_none());

        let (status, body) = get(router, "/api/builders/nobody").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let error: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(error["error"], "Builder nobody not found");
    }

    #[tokio::test]
    async fn test_store_failure_is_500() {
        let (store, router) = router();
        store.set_offline(true);
        let (status, _) = get(router, "/api/builders").await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
