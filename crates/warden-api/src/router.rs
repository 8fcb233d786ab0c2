//! Application router configuration.

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{
    devices, directory, health_handler, sync, templates, webhook_events, webhooks,
};
use crate::state::AppState;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/api/health", get(health_handler))
        // Devices
        .route(
            "/api/devices",
            get(devices::list_devices_handler).post(devices::create_device_handler),
        )
        .route("/api/devices/discover", post(devices::discover_devices_handler))
        .route(
            "/api/devices/:device_id",
            get(devices::get_device_handler)
                .put(devices::update_device_handler)
                .delete(devices::delete_device_handler),
        )
        .route(
            "/api/devices/:device_id/test-connection",
            post(devices::test_connection_handler),
        )
        .route(
            "/api/devices/:device_id/commands",
            post(devices::send_command_handler),
        )
        .route(
            "/api/devices/:device_id/health",
            get(devices::device_health_handler),
        )
        .route(
            "/api/devices/:device_id/info",
            get(devices::device_info_handler),
        )
        // Reconciliation
        .route(
            "/api/devices/:device_id/sync",
            get(sync::sync_status_handler).post(sync::sync_employees_handler),
        )
        .route(
            "/api/devices/:device_id/sync/retry",
            post(sync::retry_failed_handler),
        )
        // Webhook registrations
        .route(
            "/api/devices/:device_id/webhooks",
            get(webhooks::list_webhooks_handler).post(webhooks::configure_webhook_handler),
        )
        .route(
            "/api/devices/:device_id/webhooks/:host_id",
            delete(webhooks::remove_webhook_handler),
        )
        // Templates
        .route(
            "/api/templates",
            get(templates::list_templates_handler).post(templates::create_template_handler),
        )
        .route(
            "/api/templates/:template_id",
            delete(templates::delete_template_handler),
        )
        .route(
            "/api/devices/:device_id/templates/auto-apply",
            post(templates::auto_apply_template_handler),
        )
        .route(
            "/api/devices/:device_id/templates/:template_id",
            post(templates::apply_template_handler),
        )
        // Directory intake (external collaborator seam)
        .route(
            "/api/directory/employees",
            put(directory::upsert_employee_handler),
        )
        .route(
            "/api/directory/employees/:employee_id",
            delete(directory::remove_employee_handler),
        )
        // Device-facing webhook endpoint: always 200
        .route(
            "/webhook/device-events",
            post(webhook_events::device_events_handler),
        )
        .route(
            "/webhook/device-events/:device_id",
            post(webhook_events::device_events_with_id_handler),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
