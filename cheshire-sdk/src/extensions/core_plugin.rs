//! Core Extension
//!
//! Always present and loaded first. Declares the built-in components at
//! priority 0, so any extension option with a positive priority replaces
//! them and unloading that extension brings them back.

use std::sync::Arc;

use serde_json::Value;

use super::manager::CORE_EXTENSION_ID;
use super::options::OptionDeclaration;
use super::types::{ExtensionManifest, Plugin, PluginDeclarations};
use crate::agents::{Agent, MAIN_AGENT_SLOT, MainAgent};

/// Priority of core declarations
pub const CORE_PRIORITY: i32 = 0;

/// The built-in extension
#[derive(Debug, Clone, Default)]
pub struct CorePlugin;

impl Plugin for CorePlugin {
    fn id(&self) -> &str {
        CORE_EXTENSION_ID
    }

    fn manifest(&self) -> ExtensionManifest {
        ExtensionManifest {
            name: "Core".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            description: "Built-in agents".into(),
            ..ExtensionManifest::new(CORE_EXTENSION_ID)
        }
    }

    fn declare(&self, _settings: &Value) -> anyhow::Result<PluginDeclarations> {
        Ok(PluginDeclarations {
            options: vec![OptionDeclaration::new::<dyn Agent, _>(
                MAIN_AGENT_SLOT,
                CORE_PRIORITY,
                |args| Ok(Arc::new(MainAgent::new(args.services.clone())) as Arc<dyn Agent>),
            )],
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_core_declares_main_agent_at_priority_zero() {
        let declarations = CorePlugin.declare(&Value::Null).unwrap();
        assert_eq!(declarations.options.len(), 1);
        assert_eq!(declarations.options[0].slot, MAIN_AGENT_SLOT);
        assert_eq!(declarations.options[0].priority, CORE_PRIORITY);
        assert_eq!(CorePlugin.manifest().id, "core");
    }
}
