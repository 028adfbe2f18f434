//! Response parsing.
//!
//! Incoming lines have the shape `MODULE:ACTION` or `MODULE:ACTION:VALUE`.
//! System lines start with `GNS:` (system status) or `MSJ:` (free-text log).

/// Field separator of the wire grammar.
pub const FIELD_SEPARATOR: char = ':';

/// Prefix of system status lines.
pub const SYSTEM_STATUS_PREFIX: &str = "GNS:";

/// Prefix of free-text log lines.
pub const LOG_MESSAGE_PREFIX: &str = "MSJ:";

/// A line split into its protocol fields.
///
/// `module` and `action` are either both present or both absent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub raw: String,
    pub module: Option<String>,
    pub action: Option<String>,
    pub value: Option<String>,
}

impl ParsedResponse {
    /// Split `raw` on `:`.
    ///
    /// With fewer than two fields nothing is extracted. Fields after the
    /// third are ignored.
    pub fn parse(raw: &str) -> Self {
        let parts: Vec<&str> = raw.split(FIELD_SEPARATOR).collect();

        if parts.len() < 2 {
            return Self {
                raw: raw.to_string(),
                module: None,
                action: None,
                value: None,
            };
        }

        Self {
            raw: raw.to_string(),
            module: Some(parts[0].to_string()),
            action: Some(parts[1].to_string()),
            value: parts.get(2).map(|v| v.to_string()),
        }
    }

    /// Module, action and value when the line addresses a module.
    pub fn module_update(&self) -> Option<(&str, &str, Option<&str>)> {
        match (&self.module, &self.action) {
            (Some(module), Some(action)) => Some((module, action, self.value.as_deref())),
            _ => None,
        }
    }
}

/// A line carrying a system-wide message rather than a module update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemMessage<'a> {
    /// `GNS:<status>`
    Status(&'a str),
    /// `MSJ:<text>`
    Log(&'a str),
}

impl<'a> SystemMessage<'a> {
    /// Classify a raw line by its system prefix.
    pub fn classify(raw: &'a str) -> Option<Self> {
        if let Some(status) = raw.strip_prefix(SYSTEM_STATUS_PREFIX) {
            Some(SystemMessage::Status(status))
        } else {
            raw.strip_prefix(LOG_MESSAGE_PREFIX).map(SystemMessage::Log)
        }
    }
}
