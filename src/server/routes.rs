/// REST handlers. Every action replies 200 with a [`RunResponse`] body.
use axum::Json;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use crate::dispatch::AppContext;
use crate::response::RunResponse;

#[derive(Serialize, Deserialize)]
pub struct Liveness {
    pub name: String,
    pub version: String,
    pub status: String,
}

#[derive(Deserialize)]
pub struct IngestBody {
    pub source: String,
}

#[derive(Deserialize)]
pub struct QueryBody {
    pub query: String,
    #[serde(default)]
    pub hide_source: bool,
}

pub async fn root() -> Json<Liveness> {
    Json(Liveness {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "ok".to_string(),
    })
}

pub async fn status(State(ctx): State<AppContext>, Path(taskid): Path<String>) -> Json<RunResponse> {
    Json(ctx.status(&taskid).await)
}

pub async fn ingest(State(ctx): State<AppContext>, Json(body): Json<IngestBody>) -> Json<RunResponse> {
    if body.source.trim().is_empty() {
        return Json(RunResponse::error("source must be specified for ingest action"));
    }
    Json(ctx.ingest(&body.source).await)
}

pub async fn query(State(ctx): State<AppContext>, Json(body): Json<QueryBody>) -> Json<RunResponse> {
    if body.query.trim().is_empty() {
        return Json(RunResponse::error("Query string must be specified for query action"));
    }
    Json(ctx.query(&body.query, body.hide_source).await)
}
