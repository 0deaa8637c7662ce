use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};

use crate::cli::Args;
use crate::client::CmsClient;
use crate::dispatch::{PartDParams, handle_action};

const SERVER_NAME: &str = "partd-backend";
const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Clone)]
struct AppState {
    base_url: String,
}

pub async fn run(opts: Args) -> anyhow::Result<()> {
    let state = AppState {
        base_url: opts.base_url.clone(),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/partd", post(partd))
        .layer(cors)
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", opts.host, opts.port)
        .parse()
        .context("parse host:port")?;

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "server": SERVER_NAME,
        "version": SERVER_VERSION,
        "description": "Medicare Part D Drug Spending & Prescriber Data",
        "endpoints": {
            "partd": "/partd",
            "health": "/health",
        },
        "tool": {
            "name": "partd",
            "actions": ["drug", "spending", "prescribers", "top", "search", "api", "help"],
        },
        "data": {
            "source": "CMS data.cms.gov",
            "quarterly": "2024 Q1-Q4",
            "annual": "2019-2023",
        },
        "documentation": "https://data.cms.gov/tools/medicare-part-d-drug-spending-dashboard",
    }))
}

async fn partd(State(st): State<AppState>, Json(params): Json<PartDParams>) -> impl IntoResponse {
    // Requests are fully independent: each one gets its own client.
    let client = CmsClient::new(st.base_url.as_str());
    tracing::info!("handling partd action {:?}", params.action);
    Json(handle_action(&params, &client).await)
}
