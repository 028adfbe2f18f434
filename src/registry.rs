//! Module registry - per-module status derived from responses.
//!
//! Modules are keyed by the id the remote side uses (`CAN1`, `CAN2`, ...).
//! An entry is created the first time a response names an unseen id and lives
//! for the rest of the session.
//!
//! # Example
//!
//! ```
//! use iac_link::registry::ModuleRegistry;
//!
//! let mut registry = ModuleRegistry::new();
//! registry.apply("CAN1", "durum", Some("1"));
//! registry.apply("CAN1", "isim", Some("Pump"));
//!
//! let module = registry.get("CAN1").unwrap();
//! assert!(module.is_active);
//! assert_eq!(module.name, "Pump");
//! ```

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Action reporting the active flag.
pub const ACTION_STATUS: &str = "durum";

/// Action reporting an error code.
pub const ACTION_ERROR: &str = "hata";

/// Action reporting the display name.
pub const ACTION_NAME: &str = "isim";

/// Last known state of one remote module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModuleStatus {
    module_id: String,
    /// Display name, initially the module id.
    pub name: String,
    pub is_active: bool,
    pub has_error: bool,
    pub error_code: i64,
    pub last_update: DateTime<Utc>,
}

impl ModuleStatus {
    fn new(module_id: &str) -> Self {
        Self {
            module_id: module_id.to_string(),
            name: module_id.to_string(),
            is_active: false,
            has_error: false,
            error_code: 0,
            last_update: Utc::now(),
        }
    }

    /// Stable id of the module.
    pub fn module_id(&self) -> &str {
        &self.module_id
    }
}

/// Registry mapping module ids to their status.
#[derive(Debug, Default)]
pub struct ModuleRegistry {
    modules: HashMap<String, ModuleStatus>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `MODULE:ACTION[:VALUE]` update.
    ///
    /// - `durum`: active when the value is `1` or `ok` (any case)
    /// - `hata`: integer error code, ignored when it does not parse
    /// - `isim`: display name, verbatim
    ///
    /// Unknown actions change no field but still create the module and bump
    /// its update time.
    pub fn apply(&mut self, module: &str, action: &str, value: Option<&str>) {
        let status = self
            .modules
            .entry(module.to_string())
            .or_insert_with(|| {
                tracing::debug!("New module {}", module);
                ModuleStatus::new(module)
            });

        match action {
            ACTION_STATUS => {
                status.is_active =
                    matches!(value, Some(v) if v == "1" || v.eq_ignore_ascii_case("ok"));
            }
            ACTION_ERROR => match value.map(|v| v.parse::<i64>()) {
                Some(Ok(code)) => {
                    status.has_error = code != 0;
                    status.error_code = code;
                }
                _ => {
                    tracing::debug!("Ignoring unparsable error code {:?} for {}", value, module);
                }
            },
            ACTION_NAME => {
                if let Some(name) = value {
                    status.name = name.to_string();
                }
            }
            _ => {}
        }

        status.last_update = Utc::now();
    }

    /// Get a module by id.
    pub fn get(&self, module_id: &str) -> Option<&ModuleStatus> {
        self.modules.get(module_id)
    }

    /// All modules, sorted by id.
    pub fn modules(&self) -> Vec<ModuleStatus> {
        let mut list: Vec<ModuleStatus> = self.modules.values().cloned().collect();
        list.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        list
    }

    /// Number of active modules.
    pub fn active_count(&self) -> usize {
        self.modules.values().filter(|m| m.is_active).count()
    }

    /// Number of modules reporting an error.
    pub fn error_count(&self) -> usize {
        self.modules.values().filter(|m| m.has_error).count()
    }

    /// Number of known modules.
    pub fn len(&self) -> usize {
        self.modules.len()
    }

    /// Check if no module has reported yet.
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_update_creates_module() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN1", "durum", Some("1"));

        let module = registry.get("CAN1").unwrap();
        assert_eq!(module.module_id(), "CAN1");
        assert_eq!(module.name, "CAN1");
        assert!(module.is_active);
        assert!(!module.has_error);
    }

    #[test]
    fn test_status_values() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN1", "durum", Some("OK"));
        assert!(registry.get("CAN1").unwrap().is_active);

        registry.apply("CAN1", "durum", Some("0"));
        assert!(!registry.get("CAN1").unwrap().is_active);

        registry.apply("CAN1", "durum", Some("ok"));
        assert!(registry.get("CAN1").unwrap().is_active);

        registry.apply("CAN1", "durum", None);
        assert!(!registry.get("CAN1").unwrap().is_active);
    }

    #[test]
    fn test_error_code_last_write_wins() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN1", "hata", Some("3"));
        let module = registry.get("CAN1").unwrap();
        assert!(module.has_error);
        assert_eq!(module.error_code, 3);

        registry.apply("CAN1", "hata", Some("0"));
        let module = registry.get("CAN1").unwrap();
        assert!(!module.has_error);
        assert_eq!(module.error_code, 0);
    }

    #[test]
    fn test_unparsable_error_code_ignored() {
        let mut registry = ModuleRegistry::new();
        registry.apply("CAN1", "hata", Some("7"));
        let before = registry.get("CAN1").unwrap().last_update;

        registry.apply("CAN1", "hata", Some("seven"));

        let module = registry.get("CAN1").unwrap();
        assert!(module.has_error);
        assert_eq!(module.error_code, 7);
        assert!(module.last_update >= before);
    }

    #[test]
    fn test_name_update() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN2", "isim", Some("Left motor"));
        registry.apply("CAN2", "isim", None);

        assert_eq!(registry.get("CAN2").unwrap().name, "Left motor");
        assert_eq!(registry.get("CAN2").unwrap().module_id(), "CAN2");
    }

    #[test]
    fn test_unknown_action_creates_module_only() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN9", "RESET", Some("ok"));

        let module = registry.get("CAN9").unwrap();
        assert!(!module.is_active);
        assert!(!module.has_error);
        assert_eq!(module.name, "CAN9");
    }

    #[test]
    fn test_sorted_list_and_counts() {
        let mut registry = ModuleRegistry::new();

        registry.apply("CAN3", "durum", Some("1"));
        registry.apply("CAN1", "hata", Some("2"));
        registry.apply("CAN2", "durum", Some("1"));
        registry.apply("CAN2", "hata", Some("5"));

        let ids: Vec<String> = registry
            .modules()
            .iter()
            .map(|m| m.module_id().to_string())
            .collect();
        assert_eq!(ids, vec!["CAN1", "CAN2", "CAN3"]);
        assert_eq!(registry.active_count(), 2);
        assert_eq!(registry.error_count(), 2);
        assert_eq!(registry.len(), 3);
    }
}
