//! # Format Handlers
//!
//! Whole-file typing. A [`FormatHandler`] pairs configured signatures and
//! extensions with a lazily loaded [`FormatPlugin`]; the [`FormatRegistry`]
//! picks exactly one handler per opened source.

pub mod catalog;
pub mod generic;
pub mod lnk;
pub mod pe;

use std::collections::BTreeSet;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use thiserror::Error;
use tracing::{debug, trace, warn};

use crate::cache::ChunkedSource;
use crate::config::{ConfigError, HandlerConfig};
use crate::evidence::EvidenceError;
use crate::pattern::PatternMatcher;
use crate::region::ByteRegion;

pub use catalog::PluginCatalog;

pub const PLUGIN_NAME_MAX_SIZE: usize = 31;
pub const GENERIC_HANDLER_NAME: &str = "Generic";

#[derive(Debug, Error)]
pub enum FormatError {
    #[error("source error: {0}")]
    Source(#[from] EvidenceError),
    #[error("malformed structure: {0}")]
    Malformed(String),
    #[error("handler `{0}` has no usable plugin")]
    Invalid(String),
}

/// UI-side sink for what a plugin knows about a source.
pub trait InfoPanel {
    fn add_property(&mut self, name: &str, value: String);
    fn add_zone(&mut self, name: &str, region: ByteRegion);
}

/// Plain in-memory panel, used by the shell and tests.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PropertyPanel {
    pub properties: Vec<(String, String)>,
    pub zones: Vec<(String, ByteRegion)>,
}

impl PropertyPanel {
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

impl InfoPanel for PropertyPanel {
    fn add_property(&mut self, name: &str, value: String) {
        self.properties.push((name.to_string(), value));
    }

    fn add_zone(&mut self, name: &str, region: ByteRegion) {
        self.zones.push((name.to_string(), region));
    }
}

/// Per-source state created by a plugin.
pub trait FormatInstance: Send {
    fn populate(&self, panel: &mut dyn InfoPanel);
}

pub trait FormatPlugin: Send + Sync {
    /// Inspect leading bytes only; must not touch the source.
    fn validate(&self, buf: &[u8], extension: &str) -> bool;

    fn create_instance(&self, source: &ChunkedSource)
    -> Result<Box<dyn FormatInstance>, FormatError>;

    fn delete_instance(&self, instance: Box<dyn FormatInstance>) {
        drop(instance);
    }

    fn populate_window(&self, instance: &dyn FormatInstance, panel: &mut dyn InfoPanel) {
        instance.populate(panel);
    }
}

pub struct FormatHandler {
    name: String,
    plugin_name: String,
    priority: u16,
    patterns: Vec<PatternMatcher>,
    extensions: BTreeSet<String>,
    plugin: OnceCell<Option<Arc<dyn FormatPlugin>>>,
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_ascii_lowercase()
}

impl FormatHandler {
    pub fn new(
        name: &str,
        plugin_name: &str,
        priority: u16,
        patterns: Vec<PatternMatcher>,
        extensions: &[String],
    ) -> Result<Self, ConfigError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if name.len() > PLUGIN_NAME_MAX_SIZE {
            return Err(ConfigError::NameTooLong {
                name: name.to_string(),
                len: name.len(),
                max: PLUGIN_NAME_MAX_SIZE,
            });
        }
        Ok(Self {
            name: name.to_string(),
            plugin_name: plugin_name.trim().to_ascii_lowercase(),
            priority,
            patterns: patterns.into_iter().filter(|p| !p.is_empty()).collect(),
            extensions: extensions
                .iter()
                .map(|e| normalize_extension(e))
                .filter(|e| !e.is_empty())
                .collect(),
            plugin: OnceCell::new(),
        })
    }

    pub fn from_config(cfg: &HandlerConfig) -> Result<Self, ConfigError> {
        let mut patterns = Vec::with_capacity(cfg.patterns.len());
        for p in &cfg.patterns {
            let matcher = PatternMatcher::parse(&p.signature, p.offset).map_err(|source| {
                ConfigError::Pattern {
                    handler: cfg.name.clone(),
                    source,
                }
            })?;
            patterns.push(matcher);
        }
        let plugin = cfg.plugin.as_deref().unwrap_or(cfg.name.as_str());
        Self::new(&cfg.name, plugin, cfg.priority, patterns, &cfg.extensions)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn priority(&self) -> u16 {
        self.priority
    }

    pub fn is_fallback(&self) -> bool {
        self.patterns.is_empty() && self.extensions.is_empty()
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.plugin.get(), Some(Some(_)))
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self.plugin.get(), Some(None))
    }

    fn matches_static(&self, buf: &[u8], extension: &str) -> bool {
        if self.is_fallback() {
            return true;
        }
        let ext = normalize_extension(extension);
        if !ext.is_empty() && self.extensions.contains(&ext) {
            return true;
        }
        self.patterns.iter().any(|p| p.matches(buf))
    }

    fn plugin(&self, catalog: &PluginCatalog) -> Option<&Arc<dyn FormatPlugin>> {
        self.plugin
            .get_or_init(|| match catalog.create(&self.plugin_name) {
                Some(plugin) => {
                    debug!("loaded plugin `{}` for handler `{}`", self.plugin_name, self.name);
                    Some(plugin)
                }
                None => {
                    warn!(
                        "handler `{}`: plugin `{}` not found, handler disabled",
                        self.name, self.plugin_name
                    );
                    None
                }
            })
            .as_ref()
    }

    /// Static prefilter, then lazy plugin load, then the plugin's own check.
    pub fn validate(&self, catalog: &PluginCatalog, buf: &[u8], extension: &str) -> bool {
        if self.is_invalid() || !self.matches_static(buf, extension) {
            return false;
        }
        let Some(plugin) = self.plugin(catalog) else {
            return false;
        };
        let ok = plugin.validate(buf, extension);
        trace!("handler `{}` validate -> {}", self.name, ok);
        ok
    }
}

impl std::fmt::Debug for FormatHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatHandler")
            .field("name", &self.name)
            .field("plugin", &self.plugin_name)
            .field("priority", &self.priority)
            .field("patterns", &self.patterns.len())
            .field("extensions", &self.extensions)
            .field("loaded", &self.is_loaded())
            .field("invalid", &self.is_invalid())
            .finish()
    }
}

/// Handlers ordered by priority, highest first, ties in registration order.
#[derive(Debug)]
pub struct FormatRegistry {
    catalog: PluginCatalog,
    handlers: Vec<FormatHandler>,
    default_handler: FormatHandler,
}

impl FormatRegistry {
    pub fn new(catalog: PluginCatalog) -> Self {
        let default_handler = FormatHandler {
            name: GENERIC_HANDLER_NAME.to_string(),
            plugin_name: generic::PLUGIN_NAME.to_string(),
            priority: 0,
            patterns: Vec::new(),
            extensions: BTreeSet::new(),
            plugin: OnceCell::with_value(Some(Arc::new(generic::GenericPlugin))),
        };
        Self {
            catalog,
            handlers: Vec::new(),
            default_handler,
        }
    }

    pub fn from_config(handlers: &[HandlerConfig]) -> Result<Self, ConfigError> {
        let mut registry = Self::new(PluginCatalog::builtin());
        for cfg in handlers {
            registry.register(FormatHandler::from_config(cfg)?)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, handler: FormatHandler) -> Result<(), ConfigError> {
        if self
            .handlers
            .iter()
            .any(|h| h.name.eq_ignore_ascii_case(&handler.name))
        {
            return Err(ConfigError::DuplicateHandler(handler.name));
        }
        let at = self
            .handlers
            .iter()
            .position(|h| h.priority < handler.priority)
            .unwrap_or(self.handlers.len());
        self.handlers.insert(at, handler);
        Ok(())
    }

    pub fn handlers(&self) -> &[FormatHandler] {
        &self.handlers
    }

    pub fn catalog(&self) -> &PluginCatalog {
        &self.catalog
    }

    /// Pick the handler for a source given its leading bytes and extension.
    pub fn resolve(&self, buf: &[u8], extension: &str) -> &FormatHandler {
        let specific = self
            .handlers
            .iter()
            .filter(|h| !h.is_fallback())
            .find(|h| h.validate(&self.catalog, buf, extension));
        if let Some(handler) = specific {
            debug!("resolved handler `{}`", handler.name);
            return handler;
        }
        let fallback = self
            .handlers
            .iter()
            .filter(|h| h.is_fallback())
            .find(|h| h.validate(&self.catalog, buf, extension));
        match fallback {
            Some(handler) => {
                debug!("resolved fallback handler `{}`", handler.name);
                handler
            }
            None => &self.default_handler,
        }
    }

    pub fn open_session<'a>(
        &'a self,
        handler: &'a FormatHandler,
        source: &ChunkedSource,
    ) -> Result<HandlerSession<'a>, FormatError> {
        let plugin = handler
            .plugin(&self.catalog)
            .ok_or_else(|| FormatError::Invalid(handler.name.clone()))?;
        let instance = plugin.create_instance(source)?;
        Ok(HandlerSession {
            handler,
            plugin: &**plugin,
            instance: Some(instance),
        })
    }
}

impl Default for FormatRegistry {
    fn default() -> Self {
        Self::new(PluginCatalog::builtin())
    }
}

/// A plugin instance bound to one source; released through
/// `delete_instance` when dropped.
pub struct HandlerSession<'a> {
    handler: &'a FormatHandler,
    plugin: &'a dyn FormatPlugin,
    instance: Option<Box<dyn FormatInstance>>,
}

impl HandlerSession<'_> {
    pub fn handler(&self) -> &FormatHandler {
        self.handler
    }

    pub fn populate_window(&self, panel: &mut dyn InfoPanel) {
        if let Some(instance) = self.instance.as_deref() {
            self.plugin.populate_window(instance, panel);
        }
    }
}

impl Drop for HandlerSession<'_> {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            self.plugin.delete_instance(instance);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::pattern::PatternMatcher;

    struct Always;

    struct Nothing;

    impl FormatInstance for Nothing {
        fn populate(&self, panel: &mut dyn InfoPanel) {
            panel.add_property("kind", "nothing".to_string());
        }
    }

    impl FormatPlugin for Always {
        fn validate(&self, _buf: &[u8], _extension: &str) -> bool {
            true
        }

        fn create_instance(
            &self,
            _source: &ChunkedSource,
        ) -> Result<Box<dyn FormatInstance>, FormatError> {
            Ok(Box::new(Nothing))
        }
    }

    fn catalog() -> PluginCatalog {
        let mut catalog = PluginCatalog::empty();
        catalog.insert("always", || Arc::new(Always));
        catalog
    }

    fn handler(name: &str, plugin: &str, priority: u16, sig: Option<&str>, ext: &[&str]) -> FormatHandler {
        let patterns = sig
            .map(|s| vec![PatternMatcher::parse(s, 0).expect("pattern")])
            .unwrap_or_default();
        let exts: Vec<String> = ext.iter().map(|e| e.to_string()).collect();
        FormatHandler::new(name, plugin, priority, patterns, &exts).expect("handler")
    }

    #[test]
    fn higher_priority_wins_and_ties_keep_registration_order() {
        let mut registry = FormatRegistry::new(catalog());
        registry.register(handler("Low", "always", 5, Some("41 42"), &[])).expect("low");
        registry.register(handler("High", "always", 10, Some("41"), &[])).expect("high");
        registry.register(handler("HighToo", "always", 10, Some("41"), &[])).expect("tie");

        let names: Vec<_> = registry.handlers().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["High", "HighToo", "Low"]);
        assert_eq!(registry.resolve(b"AB", "").name(), "High");
        assert_eq!(registry.resolve(b"AB", "").name(), "High");
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let mut registry = FormatRegistry::new(catalog());
        registry.register(handler("Text", "always", 1, None, &[".TXT"])).expect("text");
        assert_eq!(registry.resolve(b"zz", "txt").name(), "Text");
        assert_eq!(registry.resolve(b"zz", "Txt").name(), "Text");
        assert_eq!(registry.resolve(b"zz", "bin").name(), GENERIC_HANDLER_NAME);
    }

    #[test]
    fn fallback_runs_after_specific_handlers() {
        let mut registry = FormatRegistry::new(catalog());
        registry.register(handler("Catch", "always", 100, None, &[])).expect("fallback");
        registry.register(handler("Sig", "always", 1, Some("7F"), &[])).expect("sig");
        assert!(registry.handlers()[0].is_fallback());
        assert_eq!(registry.resolve(&[0x7F], "").name(), "Sig");
        assert_eq!(registry.resolve(&[0x00], "").name(), "Catch");
    }

    #[test]
    fn unknown_plugin_marks_handler_invalid_forever() {
        let mut registry = FormatRegistry::new(catalog());
        registry.register(handler("Ghost", "missing", 9, Some("00"), &[])).expect("ghost");
        assert!(!registry.handlers()[0].is_loaded());
        assert_eq!(registry.resolve(&[0], "").name(), GENERIC_HANDLER_NAME);
        assert!(registry.handlers()[0].is_invalid());
        assert!(!registry.handlers()[0].validate(registry.catalog(), &[0], ""));
    }

    #[test]
    fn rejects_bad_names() {
        assert!(matches!(
            FormatHandler::new("  ", "x", 0, Vec::new(), &[]),
            Err(ConfigError::EmptyName)
        ));
        let long = "n".repeat(PLUGIN_NAME_MAX_SIZE + 1);
        assert!(matches!(
            FormatHandler::new(&long, "x", 0, Vec::new(), &[]),
            Err(ConfigError::NameTooLong { .. })
        ));
        let mut registry = FormatRegistry::new(catalog());
        registry.register(handler("A", "always", 0, Some("00"), &[])).expect("a");
        assert!(matches!(
            registry.register(handler("a", "always", 0, Some("01"), &[])),
            Err(ConfigError::DuplicateHandler(_))
        ));
    }

    static RELEASED: AtomicUsize = AtomicUsize::new(0);

    struct Counted;

    impl FormatPlugin for Counted {
        fn validate(&self, _buf: &[u8], _extension: &str) -> bool {
            true
        }

        fn create_instance(
            &self,
            _source: &ChunkedSource,
        ) -> Result<Box<dyn FormatInstance>, FormatError> {
            Ok(Box::new(Nothing))
        }

        fn delete_instance(&self, instance: Box<dyn FormatInstance>) {
            RELEASED.fetch_add(1, Ordering::SeqCst);
            drop(instance);
        }
    }

    #[test]
    fn session_releases_instance_once() {
        let mut catalog = PluginCatalog::empty();
        catalog.insert("counted", || Arc::new(Counted));
        let mut registry = FormatRegistry::new(catalog);
        registry.register(handler("C", "counted", 1, Some("00"), &[])).expect("c");

        let source = ChunkedSource::from_bytes(vec![0u8; 4], 64);
        let handler = registry.resolve(&[0], "");
        {
            let session = registry.open_session(handler, &source).expect("session");
            let mut panel = PropertyPanel::default();
            session.populate_window(&mut panel);
            assert_eq!(panel.property("kind"), Some("nothing"));
        }
        assert_eq!(RELEASED.load(Ordering::SeqCst), 1);
    }
}
