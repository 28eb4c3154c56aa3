// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Response header middleware.

use axum::{extract::Request, http::header, http::HeaderValue, middleware::Next, response::Response};
use std::time::Instant;

/// Header reporting how long the server held a long-poll request, in ms.
pub const PROCESS_TIME_HEADER: &str = "X-Server-Process-Time";

/// Add security headers to all responses.
pub async fn add_security_headers(req: Request, next: Next) -> Response {
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(
        "X-Content-Type-Options",
        HeaderValue::from_static("nosniff"),
    );
    headers.insert("X-Frame-Options", HeaderValue::from_static("DENY"));
    headers.insert(
        "Strict-Transport-Security",
        HeaderValue::from_static("max-age=31536000; includeSubDomains"),
    );
    headers.insert(
        "Content-Security-Policy",
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    headers.insert("Referrer-Policy", HeaderValue::from_static("no-referrer"));

    response
}

/// Long-poll responses must never be cached by intermediaries, and report
/// the time the request was held.
pub async fn longpoll_headers(req: Request, next: Next) -> Response {
    let started = Instant::now();
    let mut response = next.run(req).await;
    let headers = response.headers_mut();

    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    let elapsed_ms = started.elapsed().as_millis().to_string();
    if let Ok(value) = HeaderValue::from_str(&elapsed_ms) {
        headers.insert(PROCESS_TIME_HEADER, value);
    }

    response
}
