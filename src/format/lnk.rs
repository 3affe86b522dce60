//! Windows shortcut (`.lnk`) header plugin.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;

use crate::cache::ChunkedSource;
use crate::format::{FormatError, FormatInstance, FormatPlugin, InfoPanel};
use crate::region::ByteRegion;

pub const PLUGIN_NAME: &str = "lnk";

pub const HEADER_SIZE: usize = 76;
const HEADER_SIGNATURE: u32 = 0x0000_004C;
const LINK_CLSID: [u8; 16] = [
    0x01, 0x14, 0x02, 0x00, 0x00, 0x00, 0x00, 0x00, 0xC0, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x46,
];

/// Seconds between 1601-01-01 and the unix epoch.
const FILETIME_UNIX_DIFF: i64 = 11_644_473_600;

static LINK_FLAG_NAMES: Lazy<BTreeMap<u32, &'static str>> = Lazy::new(|| {
    [
        "HasTargetIDList",
        "HasLinkInfo",
        "HasName",
        "HasRelativePath",
        "HasWorkingDir",
        "HasArguments",
        "HasIconLocation",
        "IsUnicode",
        "ForceNoLinkInfo",
        "HasExpString",
        "RunInSeparateProcess",
        "Unknown0",
        "HasDarwinID",
        "RunAsUser",
        "HasExpIcon",
        "NoPidlAlias",
        "Unknown1",
        "RunWithShimLayer",
        "ForceNoLinkTrack",
        "EnableTargetMetadata",
        "DisableLinkPathTracking",
        "DisableKnownFolderTracking",
        "DisableKnownFolderAlias",
        "AllowLinkToLink",
        "UnaliasOnSave",
        "PreferEnvironmentPath",
        "KeepLocalIDListForUNCTarget",
    ]
    .into_iter()
    .enumerate()
    .map(|(bit, name)| (1u32 << bit, name))
    .collect()
});

static FILE_ATTRIBUTE_NAMES: Lazy<BTreeMap<u32, &'static str>> = Lazy::new(|| {
    [
        "ReadOnly",
        "Hidden",
        "System",
        "VolumeLabel",
        "Directory",
        "Archive",
        "Device",
        "Normal",
        "Temporary",
        "SparseFile",
        "ReparsePoint",
        "Compressed",
        "Offline",
        "NotContentIndexed",
        "Encrypted",
        "UnknownWindows95FAT",
        "Virtual",
    ]
    .into_iter()
    .enumerate()
    .map(|(bit, name)| (1u32 << bit, name))
    .collect()
});

static SHOW_WINDOW_NAMES: Lazy<BTreeMap<u32, &'static str>> = Lazy::new(|| {
    [
        "Hide",
        "Normal",
        "ShowMinimized",
        "Maximize",
        "ShowNoActivate",
        "Show",
        "Minimize",
        "ShowMinNoActive",
        "ShowNA",
        "Restore",
        "ShowDefault",
        "ForceMinimize",
        "NormalNA",
    ]
    .into_iter()
    .enumerate()
    .map(|(value, name)| (value as u32, name))
    .collect()
});

static HOTKEY_KEY_NAMES: Lazy<BTreeMap<u8, String>> = Lazy::new(|| {
    let mut names = BTreeMap::new();
    for key in (b'0'..=b'9').chain(b'A'..=b'Z') {
        names.insert(key, (key as char).to_string());
    }
    for n in 1..=24u8 {
        names.insert(0x6F + n, format!("F{n}"));
    }
    names.insert(0x90, "NumLock".to_string());
    names.insert(0x91, "Scroll".to_string());
    names
});

const HOTKEY_MODIFIERS: &[(u8, &str)] = &[(0x01, "SHIFT"), (0x02, "CONTROL"), (0x04, "ALT")];

fn set_flag_names(table: &BTreeMap<u32, &'static str>, value: u32) -> String {
    let names: Vec<&str> = table
        .iter()
        .filter(|(bit, _)| value & **bit != 0)
        .map(|(_, name)| *name)
        .collect();
    if names.is_empty() {
        "None".to_string()
    } else {
        names.join(" | ")
    }
}

fn hotkey_name(hotkey: u16) -> String {
    let [key, modifiers] = hotkey.to_le_bytes();
    if key == 0 {
        return "None".to_string();
    }
    let mut parts: Vec<String> = HOTKEY_MODIFIERS
        .iter()
        .filter(|(bit, _)| modifiers & bit != 0)
        .map(|(_, name)| name.to_string())
        .collect();
    parts.push(
        HOTKEY_KEY_NAMES
            .get(&key)
            .cloned()
            .unwrap_or_else(|| format!("0x{key:02X}")),
    );
    parts.join(" + ")
}

fn filetime(value: u64) -> String {
    if value == 0 {
        return "not set".to_string();
    }
    let secs = (value / 10_000_000) as i64 - FILETIME_UNIX_DIFF;
    let nanos = ((value % 10_000_000) * 100) as u32;
    DateTime::<Utc>::from_timestamp(secs, nanos)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("invalid ({value})"))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellLinkHeader {
    pub link_flags: u32,
    pub file_attributes: u32,
    pub creation_time: u64,
    pub access_time: u64,
    pub write_time: u64,
    pub file_size: u32,
    pub icon_index: i32,
    pub show_command: u32,
    pub hotkey: u16,
}

impl ShellLinkHeader {
    pub fn parse(buf: &[u8]) -> Option<Self> {
        let header = buf.get(..HEADER_SIZE)?;
        let u32_at = |pos: usize| {
            u32::from_le_bytes([header[pos], header[pos + 1], header[pos + 2], header[pos + 3]])
        };
        let u64_at = |pos: usize| (u32_at(pos) as u64) | ((u32_at(pos + 4) as u64) << 32);

        if u32_at(0) != HEADER_SIGNATURE || header[4..20] != LINK_CLSID {
            return None;
        }
        Some(Self {
            link_flags: u32_at(20),
            file_attributes: u32_at(24),
            creation_time: u64_at(28),
            access_time: u64_at(36),
            write_time: u64_at(44),
            file_size: u32_at(52),
            icon_index: u32_at(56) as i32,
            show_command: u32_at(60),
            hotkey: u16::from_le_bytes([header[64], header[65]]),
        })
    }
}

pub struct LnkPlugin;

pub struct LnkInstance {
    header: ShellLinkHeader,
}

impl FormatPlugin for LnkPlugin {
    fn validate(&self, buf: &[u8], _extension: &str) -> bool {
        ShellLinkHeader::parse(buf).is_some()
    }

    fn create_instance(
        &self,
        source: &ChunkedSource,
    ) -> Result<Box<dyn FormatInstance>, FormatError> {
        let buf = source.get(0, HEADER_SIZE, true)?;
        let header = ShellLinkHeader::parse(&buf)
            .ok_or_else(|| FormatError::Malformed("invalid shell link header".to_string()))?;
        Ok(Box::new(LnkInstance { header }))
    }
}

impl FormatInstance for LnkInstance {
    fn populate(&self, panel: &mut dyn InfoPanel) {
        let h = &self.header;
        panel.add_property("Format", "Windows Shell Link".to_string());
        panel.add_property("Link flags", set_flag_names(&LINK_FLAG_NAMES, h.link_flags));
        panel.add_property(
            "File attributes",
            set_flag_names(&FILE_ATTRIBUTE_NAMES, h.file_attributes),
        );
        panel.add_property("Creation time", filetime(h.creation_time));
        panel.add_property("Access time", filetime(h.access_time));
        panel.add_property("Write time", filetime(h.write_time));
        panel.add_property("Target size", h.file_size.to_string());
        panel.add_property("Icon index", h.icon_index.to_string());
        panel.add_property(
            "Show command",
            SHOW_WINDOW_NAMES
                .get(&h.show_command)
                .map(|s| s.to_string())
                .unwrap_or_else(|| format!("unknown ({})", h.show_command)),
        );
        panel.add_property("Hot key", hotkey_name(h.hotkey));
        if let Some(zone) = ByteRegion::new(0, HEADER_SIZE as u64) {
            panel.add_zone("ShellLinkHeader", zone);
        }
    }
}
