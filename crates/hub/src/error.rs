// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds for the operator-facing API.
//!
//! Every operator endpoint answers with a packet envelope `{code, msg?}`;
//! non-2xx statuses carry a non-zero code. Malformed input uses code `-1`
//! (the historical wire value), everything else code `1`.

use std::fmt;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::packet::Packet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HubError {
    BadRequest,
    Unauthorized,
    NotFound,
    PayloadTooLarge,
    RangeNotSatisfiable,
    DeviceFailure,
    UnknownDevice,
    DeviceTimeout,
    BridgeInUse,
    Internal,
}

impl HubError {
    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::BadRequest | Self::BridgeInUse => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::RangeNotSatisfiable => StatusCode::RANGE_NOT_SATISFIABLE,
            Self::DeviceFailure | Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            Self::UnknownDevice => StatusCode::BAD_GATEWAY,
            Self::DeviceTimeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// The `code` value carried in the response packet.
    pub fn packet_code(&self) -> i32 {
        match self {
            Self::BadRequest => -1,
            _ => 1,
        }
    }

    pub fn default_msg(&self) -> &'static str {
        match self {
            Self::BadRequest => "invalid parameter",
            Self::Unauthorized => "unauthorized",
            Self::NotFound => "not found",
            Self::PayloadTooLarge => "payload too large",
            Self::RangeNotSatisfiable => "range not satisfiable",
            Self::DeviceFailure => "device reported failure",
            Self::UnknownDevice => "device not exist",
            Self::DeviceTimeout => "response timeout",
            Self::BridgeInUse => "bridge is in use",
            Self::Internal => "internal error",
        }
    }

    /// Response with the default message.
    pub fn response(self) -> Response {
        self.response_msg(self.default_msg())
    }

    /// Response with a caller-supplied message (e.g. a device error string
    /// forwarded verbatim).
    pub fn response_msg(self, msg: impl Into<String>) -> Response {
        let body = Packet::fail(self.packet_code(), msg);
        (self.http_status(), Json(body)).into_response()
    }
}

impl fmt::Display for HubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.default_msg())
    }
}

impl std::error::Error for HubError {}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        self.response()
    }
}
