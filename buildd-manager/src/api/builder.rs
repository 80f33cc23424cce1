//! Builder API Handlers
//!
//! Read-only views of the farm.

use axum::{
    Json,
    extract::{Path, State},
};
use buildd_core::dto::builder::BuilderSummary;

use crate::api::error::{ApiError, ApiResult};
use crate::repository::Repositories;

/// GET /api/builders
/// List all builders with their current job
pub async fn list_builders(State(repos): State<Repositories>) -> ApiResult<Json<Vec<BuilderSummary>>> {
    tracing::debug!("Listing all builders");

    let builders = repos
        .builders
        .list_with_jobs()
        .await?
        .into_iter()
        .map(|(builder, job)| BuilderSummary::new(builder, job.as_ref()))
        .collect();

    Ok(Json(builders))
}

/// GET /api/builders/{name}
/// Get details for a specific builder
pub async fn get_builder(
    State(repos): State<Repositories>,
    Path(name): Path<String>,
) -> ApiResult<Json<BuilderSummary>> {
    tracing::debug!("Getting builder: {}", name);

    let builder = repos
        .builders
        .find_by_name(&name)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Builder {} not found", name)))?;
    let job = repos.builders.current_job(&name).await?;

    Ok(Json(BuilderSummary::new(builder, job.as_ref())))
}
