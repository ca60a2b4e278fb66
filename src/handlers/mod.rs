// src/handlers/mod.rs

use std::{convert::Infallible, net::SocketAddr};

use axum::{
    Json,
    extract::{ConnectInfo, FromRequestParts},
    http::{HeaderMap, header, request::Parts},
    response::IntoResponse,
};
use serde_json::json;

use crate::models::session::DeviceInfo;

pub mod answer;
pub mod auth;
pub mod exam;
pub mod violation;

/// Request metadata recorded with sessions and violations.
#[derive(Debug, Clone, Default)]
pub struct ClientContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    /// Client-chosen exam session identifier from `X-Session-Id`.
    pub session_id: Option<String>,
}

impl ClientContext {
    pub fn device_info(&self) -> DeviceInfo {
        let user_agent = self.user_agent.clone().unwrap_or_default();
        DeviceInfo {
            platform: platform_of(&user_agent).to_string(),
            user_agent,
            ip_address: self.ip_address.clone().unwrap_or_default(),
        }
    }
}

impl<S> FromRequestParts<S> for ClientContext
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip().to_string());

        Ok(Self {
            ip_address: forwarded_ip(&parts.headers).or(peer),
            user_agent: header_str(&parts.headers, header::USER_AGENT.as_str()),
            session_id: header_str(&parts.headers, "x-session-id"),
        })
    }
}

fn header_str(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    header_str(headers, "x-forwarded-for")
        .and_then(|list| list.split(',').next().map(|ip| ip.trim().to_string()))
        .filter(|ip| !ip.is_empty())
        .or_else(|| header_str(headers, "x-real-ip"))
}

fn platform_of(user_agent: &str) -> &'static str {
    const PLATFORMS: [(&str, &str); 6] = [
        ("Android", "Android"),
        ("iPhone", "iOS"),
        ("iPad", "iOS"),
        ("Windows", "Windows"),
        ("Mac OS", "macOS"),
        ("Linux", "Linux"),
    ];

    PLATFORMS
        .iter()
        .find(|(needle, _)| user_agent.contains(needle))
        .map_or("unknown", |(_, platform)| platform)
}

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}
