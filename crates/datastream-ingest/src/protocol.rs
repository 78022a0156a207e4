// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Stream protocol messages.
//!
//! Newline-delimited JSON. The producer sends any number of
//! [`StreamRequest`] lines, half-closes its side, then reads exactly one
//! [`StreamResponse`] line.

use crate::record::WireRecord;
use serde::{Deserialize, Serialize};

/// Producer -> receiver: one record per frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamRequest {
    pub data: WireRecord,
}

/// Terminal status of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Ok,
    Error,
}

/// Receiver -> producer: the single terminal acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamResponse {
    pub status: AckStatus,
    pub message: String,
    /// Records durably stored during this session
    #[serde(default)]
    pub persisted: u64,
}

impl StreamResponse {
    pub fn ok(persisted: u64) -> Self {
        Self {
            status: AckStatus::Ok,
            message: format!("data stored ({} records)", persisted),
            persisted,
        }
    }

    pub fn error(message: impl Into<String>, persisted: u64) -> Self {
        Self {
            status: AckStatus::Error,
            message: message.into(),
            persisted,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == AckStatus::Ok
    }
}
