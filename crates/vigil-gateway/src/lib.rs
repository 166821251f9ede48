// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Priority event gateway.
//!
//! A single long-lived consumer task serializes access to a target agent:
//! events are popped in `(priority, submission order)` order, dispatched to
//! [`AgentHandler::invoke`], and the result is either delivered to the
//! event's response future (interactive messages) or handed to a
//! source-specific response handler (background events).

mod event;
mod gateway;

pub use event::{Event, EventBuilder, EventSource, EventPriority};
pub use gateway::{AgentHandler, Gateway, GatewayConfig, GatewayError, ResponseHandler};
