// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025-2026 natyamatsya contributors
//
// Client/server wire protocol: fixed-size frames and the server-side
// connection state machine.

pub mod handler;
pub mod message;

pub use handler::{ConnectionHandler, HandlerState, ServerState};
pub use message::{
    LogLine, Message, RequestCode, DISPLAY_ALL, LOG_LINE_SIZE, LOG_TEXT_LEN, MESSAGE_SIZE,
    MODIFY_ORDINAL_SLOT, NO_REQUEST, PAYLOAD_LEN,
};
