//! Client-side counters recorded through the `metrics` facade.
//!
//! The library never installs a recorder; embedders that want these numbers
//! install their own exporter before opening connections. Call
//! [`describe_metrics`] once after installing it.

use metrics::{counter, describe_counter, describe_histogram, histogram};

// Metric names as constants for consistency
pub const SOCKET_CONNECTS_TOTAL: &str = "wayfarer_socket_connects_total";
pub const SOCKET_CONNECT_ERRORS_TOTAL: &str = "wayfarer_socket_connect_errors_total";
pub const SOCKET_RECONNECT_ATTEMPTS_TOTAL: &str = "wayfarer_socket_reconnect_attempts_total";
pub const TOKEN_REFRESHES_TOTAL: &str = "wayfarer_token_refreshes_total";
pub const PUSH_EVENTS_TOTAL: &str = "wayfarer_push_events_total";
pub const PLANNER_CHUNKS_TOTAL: &str = "wayfarer_planner_chunks_total";
pub const API_REQUEST_DURATION_SECONDS: &str = "wayfarer_api_request_duration_seconds";

pub fn describe_metrics() {
    describe_counter!(
        SOCKET_CONNECTS_TOTAL,
        "Successful namespace connections by namespace"
    );
    describe_counter!(
        SOCKET_CONNECT_ERRORS_TOTAL,
        "Failed connection attempts by namespace"
    );
    describe_counter!(
        SOCKET_RECONNECT_ATTEMPTS_TOTAL,
        "Automatic reconnection attempts by namespace"
    );
    describe_counter!(
        TOKEN_REFRESHES_TOTAL,
        "Forced token refreshes by origin (socket/rest) and outcome"
    );
    describe_counter!(
        PUSH_EVENTS_TOTAL,
        "Server-pushed events received by namespace"
    );
    describe_counter!(PLANNER_CHUNKS_TOTAL, "Planner stream chunks appended");
    describe_histogram!(
        API_REQUEST_DURATION_SECONDS,
        "REST request duration in seconds"
    );
}

pub fn record_connect(namespace: &'static str) {
    counter!(SOCKET_CONNECTS_TOTAL, "namespace" => namespace).increment(1);
}

pub fn record_connect_error(namespace: &'static str) {
    counter!(SOCKET_CONNECT_ERRORS_TOTAL, "namespace" => namespace).increment(1);
}

pub fn record_reconnect_attempt(namespace: &'static str) {
    counter!(SOCKET_RECONNECT_ATTEMPTS_TOTAL, "namespace" => namespace).increment(1);
}

pub fn record_token_refresh(origin: &'static str, success: bool) {
    let outcome = if success { "success" } else { "failed" };
    counter!(TOKEN_REFRESHES_TOTAL, "origin" => origin, "outcome" => outcome).increment(1);
}

pub fn record_push_event(namespace: &'static str) {
    counter!(PUSH_EVENTS_TOTAL, "namespace" => namespace).increment(1);
}

pub fn record_planner_chunk() {
    counter!(PLANNER_CHUNKS_TOTAL).increment(1);
}

pub fn record_api_request(method: &str, duration: f64) {
    histogram!(API_REQUEST_DURATION_SECONDS, "method" => method.to_string()).record(duration);
}
