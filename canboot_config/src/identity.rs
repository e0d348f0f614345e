use serde::{Deserialize, Serialize};

/// Length of the module type field on the wire.
pub const MODULE_TYPE_LENGTH: usize = 12;
/// Length of the module name field on the wire.
pub const MODULE_NAME_LENGTH: usize = 16;

/// How a module presents itself to a bootloader master.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct Identity {
    /// Firmware family this bootloader serves, reported in describe replies.
    pub module_type: String,
    /// Name written to the configuration record when the stored one is blank.
    pub default_module_name: String,
}

impl Default for Identity {
    fn default() -> Self {
        Self { module_type: "canboot".into(), default_module_name: "unnamed".into() }
    }
}
