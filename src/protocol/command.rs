//! Outgoing command text: vocabulary, sanitization and validation.
//!
//! # Example
//!
//! ```
//! use iac_link::protocol::{ModuleCommand, SystemCommand};
//!
//! assert_eq!(SystemCommand::StartSystem.as_str(), "start_system");
//! assert_eq!(ModuleCommand::GetStatus.render("CAN1").unwrap(), "CAN1:get_durum");
//! ```

use crate::error::{LinkError, Result};

/// Default maximum command length, after sanitization.
pub const DEFAULT_MAX_COMMAND_LEN: usize = 512;

/// Commands addressed to the whole system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SystemCommand {
    StartSystem,
    StopSystem,
    GetStatus,
    Reset,
}

impl SystemCommand {
    /// Every system command, in menu order.
    pub const ALL: [SystemCommand; 4] = [
        SystemCommand::StartSystem,
        SystemCommand::StopSystem,
        SystemCommand::GetStatus,
        SystemCommand::Reset,
    ];

    /// Wire keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemCommand::StartSystem => "start_system",
            SystemCommand::StopSystem => "stop_system",
            SystemCommand::GetStatus => "get_status",
            SystemCommand::Reset => "reset",
        }
    }
}

/// Commands addressed to a single module, sent as `MODULE:COMMAND`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModuleCommand {
    Reset,
    GetLog,
    GetName,
    GetStatus,
    GetError,
}

impl ModuleCommand {
    /// Every module command, in menu order.
    pub const ALL: [ModuleCommand; 5] = [
        ModuleCommand::Reset,
        ModuleCommand::GetLog,
        ModuleCommand::GetName,
        ModuleCommand::GetStatus,
        ModuleCommand::GetError,
    ];

    /// Wire keyword.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModuleCommand::Reset => "RESET",
            ModuleCommand::GetLog => "get_log",
            ModuleCommand::GetName => "get_isim",
            ModuleCommand::GetStatus => "get_durum",
            ModuleCommand::GetError => "get_hata",
        }
    }

    /// Full command text for `module_id`.
    pub fn render(&self, module_id: &str) -> Result<String> {
        check_module_id(module_id)?;
        Ok(format!("{}:{}", module_id, self.as_str()))
    }
}

/// `MODULE:set_isim:NAME`
pub fn set_name(module_id: &str, name: &str) -> Result<String> {
    check_module_id(module_id)?;
    Ok(format!("{}:set_isim:{}", module_id, name))
}

/// `MODULE:set_hata:1` or `MODULE:set_hata:0`
pub fn set_error(module_id: &str, error_state: bool) -> Result<String> {
    check_module_id(module_id)?;
    let value = if error_state { "1" } else { "0" };
    Ok(format!("{}:set_hata:{}", module_id, value))
}

/// Module ids are 2-4 uppercase letters followed by 1-2 digits (`CAN1`, `MTR12`).
pub fn is_valid_module_id(module_id: &str) -> bool {
    let letters = module_id
        .bytes()
        .take_while(|b| b.is_ascii_uppercase())
        .count();
    let digits = &module_id.as_bytes()[letters..];

    (2..=4).contains(&letters)
        && (1..=2).contains(&digits.len())
        && digits.iter().all(|b| b.is_ascii_digit())
}

fn check_module_id(module_id: &str) -> Result<()> {
    if is_valid_module_id(module_id) {
        Ok(())
    } else {
        Err(LinkError::Validation(format!(
            "invalid module id {:?}",
            module_id
        )))
    }
}

/// Trim surrounding whitespace and strip embedded `\n` / `\r`.
pub fn sanitize(command: &str) -> String {
    command
        .trim()
        .chars()
        .filter(|c| *c != '\n' && *c != '\r')
        .collect()
}

/// Validate `command` and return its sanitized form.
///
/// Rejects text that is blank after trimming, contains non-ASCII
/// characters, or is longer than `max_len` once sanitized.
pub fn validate(command: &str, max_len: usize) -> Result<String> {
    if command.trim().is_empty() {
        return Err(LinkError::Validation("command is empty".to_string()));
    }

    if !command.is_ascii() {
        return Err(LinkError::Validation(
            "command contains non-ASCII characters".to_string(),
        ));
    }

    let sanitized = sanitize(command);
    if sanitized.len() > max_len {
        return Err(LinkError::Validation(format!(
            "command is {} characters, limit is {}",
            sanitized.len(),
            max_len
        )));
    }

    Ok(sanitized)
}
