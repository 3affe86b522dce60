use crate::cache::ChunkedSource;
use crate::format::{FormatError, FormatInstance, FormatPlugin, InfoPanel};

pub const PLUGIN_NAME: &str = "generic";

const PREVIEW_LEN: usize = 16;

/// Accepts anything; reports size and leading bytes.
pub struct GenericPlugin;

pub struct GenericInstance {
    size: u64,
    head: Vec<u8>,
}

impl FormatPlugin for GenericPlugin {
    fn validate(&self, _buf: &[u8], _extension: &str) -> bool {
        true
    }

    fn create_instance(
        &self,
        source: &ChunkedSource,
    ) -> Result<Box<dyn FormatInstance>, FormatError> {
        let head = source.get(0, PREVIEW_LEN, false)?;
        Ok(Box::new(GenericInstance {
            size: source.len(),
            head: head.to_vec(),
        }))
    }
}

impl FormatInstance for GenericInstance {
    fn populate(&self, panel: &mut dyn InfoPanel) {
        panel.add_property("Format", "Binary".to_string());
        panel.add_property("Size", self.size.to_string());
        panel.add_property("First bytes", hex::encode_upper(&self.head));
    }
}
