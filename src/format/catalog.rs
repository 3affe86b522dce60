use std::collections::BTreeMap;
use std::sync::Arc;

use crate::format::{FormatPlugin, generic, lnk, pe};

pub type PluginFactory = fn() -> Arc<dyn FormatPlugin>;

fn generic_plugin() -> Arc<dyn FormatPlugin> {
    Arc::new(generic::GenericPlugin)
}

fn lnk_plugin() -> Arc<dyn FormatPlugin> {
    Arc::new(lnk::LnkPlugin)
}

fn pe_plugin() -> Arc<dyn FormatPlugin> {
    Arc::new(pe::PePlugin)
}

/// Name to factory map of the plugins a handler may load.
#[derive(Clone, Default)]
pub struct PluginCatalog {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        catalog.insert(generic::PLUGIN_NAME, generic_plugin);
        catalog.insert(lnk::PLUGIN_NAME, lnk_plugin);
        catalog.insert(pe::PLUGIN_NAME, pe_plugin);
        catalog
    }

    pub fn insert(&mut self, name: &str, factory: PluginFactory) {
        self.factories.insert(name.to_ascii_lowercase(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_lowercase())
    }

    pub fn create(&self, name: &str) -> Option<Arc<dyn FormatPlugin>> {
        self.factories
            .get(&name.to_ascii_lowercase())
            .map(|factory| factory())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.factories.keys()).finish()
    }
}
