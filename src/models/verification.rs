// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Email verification codes (`verifications/{email}`).

use serde::{Deserialize, Serialize};

/// Codes are valid for five minutes after issue.
pub const CODE_TTL_MS: i64 = 5 * 60 * 1000;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VerificationCode {
    pub code: String,
    /// Issue time in Unix milliseconds
    pub created_at: i64,
}

impl VerificationCode {
    pub fn is_expired(&self, now_ms: i64) -> bool {
        now_ms - self.created_at > CODE_TTL_MS
    }
}
