//! The device-facing webhook endpoint.
//!
//! `POST /webhook/device-events[/:device_id]` accepts whatever JSON a
//! device pushes and always answers HTTP 200 with a structured body.
//! Devices retry aggressively on non-2xx; an acknowledged-but-logged
//! failure is strictly better than a retry flood.

use std::net::SocketAddr;

use axum::Json;
use axum::extract::{ConnectInfo, Path, State};
use axum::http::HeaderMap;
use serde_json::Value;

use warden_devices::IngestResponse;

use crate::state::AppState;

/// POST /webhook/device-events
pub async fn device_events_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<Value>>,
) -> Json<IngestResponse> {
    ingest(state, None, headers, connect_info, payload).await
}

/// POST /webhook/device-events/:device_id
pub async fn device_events_with_id_handler(
    State(state): State<AppState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<Value>>,
) -> Json<IngestResponse> {
    ingest(state, Some(device_id), headers, connect_info, payload).await
}

async fn ingest(
    state: AppState,
    device_id: Option<String>,
    headers: HeaderMap,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    payload: Option<Json<Value>>,
) -> Json<IngestResponse> {
    let source_ip = client_ip(&headers, connect_info);
    // A body that failed JSON parsing still gets processed (as null) so
    // the device receives its 200
    let payload = payload.map(|Json(value)| value).unwrap_or(Value::Null);

    let response = state.ingest.process(device_id, source_ip, payload).await;
    Json(response)
}

/// Client IP: proxy header first, then the socket address.
fn client_ip(headers: &HeaderMap, connect_info: Option<ConnectInfo<SocketAddr>>) -> String {
    if let Some(forwarded) = headers.get("x-forwarded-for") {
        if let Ok(value) = forwarded.to_str() {
            if let Some(first) = value.split(',').next() {
                let trimmed = first.trim();
                if !trimmed.is_empty() {
                    return trimmed.to_string();
                }
            }
        }
    }
    connect_info
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ip_prefers_forwarded_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.9.8.7, 172.16.0.1".parse().unwrap());
        assert_eq!(client_ip(&headers, None), "10.9.8.7");
    }

    #[test]
    fn test_client_ip_falls_back_to_socket() {
        let headers = HeaderMap::new();
        let addr: SocketAddr = "192.168.1.5:55000".parse().unwrap();
        assert_eq!(client_ip(&headers, Some(ConnectInfo(addr))), "192.168.1.5");
    }

    #[test]
    fn test_client_ip_unknown_when_nothing_available() {
        let headers = HeaderMap::new();
        assert_eq!(client_ip(&headers, None), "unknown");
    }
}
