// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::models::BalanceKey;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    InvalidPayload(String),

    #[error("Insufficient {0} balance")]
    InsufficientFunds(BalanceKey),

    #[error("Item '{0}' exists in both web and game catalogs; specify source 'web' or 'game'")]
    AmbiguousSource(String),

    #[error("Invalid catalog price: {0}")]
    InvalidPrice(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Delivery failed: {0}")]
    Delivery(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    /// Stable machine-readable kind reported to callers.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Unauthorized => "unauthorized",
            AppError::InvalidToken => "invalid_token",
            AppError::NotFound(_) => "not_found",
            AppError::InvalidPayload(_) => "invalid_payload",
            AppError::InsufficientFunds(_) => "insufficient_funds",
            AppError::AmbiguousSource(_) => "ambiguous_source",
            AppError::InvalidPrice(_) => "invalid_price",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::Unavailable(_) => "unavailable",
            AppError::Delivery(_) => "delivery_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    /// Wrap a store failure. The message is logged, never returned.
    pub fn store(err: impl std::fmt::Display) -> Self {
        AppError::Unavailable(err.to_string())
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, details) = match &self {
            AppError::Unauthorized | AppError::InvalidToken => (StatusCode::UNAUTHORIZED, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, Some(msg.clone())),
            AppError::InvalidPayload(msg) | AppError::InvalidPrice(msg) => {
                (StatusCode::BAD_REQUEST, Some(msg.clone()))
            }
            AppError::InsufficientFunds(_) | AppError::AmbiguousSource(_) => {
                (StatusCode::BAD_REQUEST, Some(self.to_string()))
            }
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, Some(msg.clone())),
            AppError::Conflict(msg) => {
                tracing::warn!(error = %msg, "Conflict");
                (StatusCode::CONFLICT, None)
            }
            AppError::Unavailable(msg) => {
                tracing::error!(error = %msg, "Store unavailable");
                (StatusCode::SERVICE_UNAVAILABLE, None)
            }
            AppError::Delivery(msg) => {
                tracing::error!(error = %msg, "Outbound delivery failed");
                (StatusCode::BAD_GATEWAY, None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, None)
            }
        };

        let body = ErrorResponse {
            error: self.kind().to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
