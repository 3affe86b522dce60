use chrono::DateTime;

use crate::cache::ChunkedSource;
use crate::dissect::pe::{MAX_HEADER_SPAN, PeLayout, parse_layout};
use crate::format::{FormatError, FormatInstance, FormatPlugin, InfoPanel};
use crate::region::ByteRegion;

pub const PLUGIN_NAME: &str = "pe";

pub struct PePlugin;

pub struct PeInstance {
    size: u64,
    layout: PeLayout,
}

impl FormatPlugin for PePlugin {
    fn validate(&self, buf: &[u8], _extension: &str) -> bool {
        // Only the DOS stub is guaranteed to be in the head buffer.
        buf.len() >= 0x40 && buf.starts_with(b"MZ")
    }

    fn create_instance(
        &self,
        source: &ChunkedSource,
    ) -> Result<Box<dyn FormatInstance>, FormatError> {
        let headers = source.get(0, MAX_HEADER_SPAN, false)?;
        let layout =
            parse_layout(&headers).map_err(|reason| FormatError::Malformed(reason.to_string()))?;
        Ok(Box::new(PeInstance {
            size: source.len(),
            layout,
        }))
    }
}

impl FormatInstance for PeInstance {
    fn populate(&self, panel: &mut dyn InfoPanel) {
        let layout = &self.layout;
        panel.add_property("Format", "Portable Executable".to_string());
        panel.add_property("Machine", layout.machine_name().to_string());
        panel.add_property(
            "Optional header",
            if layout.is_64 { "PE32+" } else { "PE32" }.to_string(),
        );
        panel.add_property(
            "Timestamp",
            DateTime::from_timestamp(layout.timestamp as i64, 0)
                .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
                .unwrap_or_else(|| layout.timestamp.to_string()),
        );
        panel.add_property("Characteristics", format!("0x{:04X}", layout.characteristics));
        panel.add_property("Sections", layout.sections.len().to_string());

        let extent = layout.image_extent();
        panel.add_property("Image extent", extent.to_string());
        if extent < self.size {
            panel.add_property("Overlay", (self.size - extent).to_string());
        }

        if let Some(headers) = ByteRegion::new(0, layout.section_table_end.min(self.size)) {
            panel.add_zone("Headers", headers);
        }
        for section in &layout.sections {
            let start = section.raw_offset as u64;
            let end = (start + section.raw_size as u64).min(self.size);
            if let Some(region) = ByteRegion::new(start, end).filter(|r| !r.is_empty()) {
                panel.add_zone(&section.name, region);
            }
        }
    }
}
