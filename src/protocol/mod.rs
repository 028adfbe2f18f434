//! Protocol module - line framing, response parsing and command text.
//!
//! This module implements the ASCII wire protocol:
//! - Line buffer for reassembling `\n`-terminated messages from chunks
//! - `MODULE:ACTION[:VALUE]` response parsing and `GNS:`/`MSJ:` system lines
//! - Command vocabulary, sanitization and validation

mod command;
mod line_buffer;
mod response;

pub use command::{
    is_valid_module_id, sanitize, set_error, set_name, validate, ModuleCommand, SystemCommand,
    DEFAULT_MAX_COMMAND_LEN,
};
pub use line_buffer::{LineBuffer, DEFAULT_MAX_LINE_LEN, DELIMITER};
pub use response::{
    ParsedResponse, SystemMessage, FIELD_SEPARATOR, LOG_MESSAGE_PREFIX, SYSTEM_STATUS_PREFIX,
};
