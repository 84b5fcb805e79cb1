// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Cognition Provider Infrastructure - Anti-Corruption Layer Implementations
//
// Each adapter translates a PromptContext into one provider's HTTP API and
// maps transport and HTTP failures onto CognitionError.

pub mod openai;
pub mod ollama;
pub mod registry;

pub use registry::ProviderRegistry;

use crate::domain::cognition::CognitionError;
use reqwest::StatusCode;

/// Map a non-success HTTP status onto the error taxonomy shared by all
/// adapters.
pub(crate) fn status_error(status: StatusCode, body: String) -> CognitionError {
    match status.as_u16() {
        401 | 403 => CognitionError::Authentication(body),
        429 => CognitionError::RateLimit,
        _ => CognitionError::Provider(format!("HTTP {}: {}", status, body)),
    }
}

pub(crate) fn transport_error(err: reqwest::Error) -> CognitionError {
    if err.is_timeout() {
        CognitionError::Network(format!("request timed out: {}", err))
    } else {
        CognitionError::Network(err.to_string())
    }
}
