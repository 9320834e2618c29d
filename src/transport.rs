//! Thin HTTP shell: inbound SMS webhook + health check.
//!
//! Everything interesting happens in the coordinator; this layer only maps
//! `(From, Body)` form posts to `handle_message` and joins the replies.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use serde::Deserialize;
use serde_json::json;
use tracing::info;

use crate::coordinator::Coordinator;

#[derive(Debug, Deserialize)]
pub struct InboundSms {
    #[serde(rename = "From")]
    pub from: String,
    #[serde(rename = "Body")]
    pub body: String,
}

pub async fn serve(coordinator: Arc<Coordinator>, bind: &str, port: u16) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_handler))
        .route("/sms", post(sms_handler))
        .with_state(coordinator);

    let addr: std::net::SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("HTTP transport listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(json!({"status": "ok"}))
}

async fn sms_handler(
    State(coordinator): State<Arc<Coordinator>>,
    Form(inbound): Form<InboundSms>,
) -> String {
    coordinator
        .handle_message(&inbound.from, &inbound.body)
        .await
        .join("\n")
}
