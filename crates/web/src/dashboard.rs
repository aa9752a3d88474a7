//! Embedded dashboard page

use axum::{
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

const DASHBOARD_HTML: &str = include_str!("../assets/dashboard.html");

const DOMAIN_PLACEHOLDER: &str = "{{DEFAULT_BASE_DOMAIN}}";

/// Render the dashboard with the configured default base domain filled in.
pub fn render(default_base_domain: &str) -> Response {
    let html = DASHBOARD_HTML.replace(DOMAIN_PLACEHOLDER, &escape_attr(default_base_domain));
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
        html,
    )
        .into_response()
}

fn escape_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('"', "&quot;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
