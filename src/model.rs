use chrono::{DateTime, Utc};

pub const UNKNOWN_SOURCE: &str = "<Unknown Source>";
pub const NO_DESCRIPTION: &str = "<No Description Available>";

const AUDIT_SUCCESS_KEYWORD: u64 = 0x0020_0000_0000_0000;
const AUDIT_FAILURE_KEYWORD: u64 = 0x0010_0000_0000_0000;

/// Channels offered by the interactive menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Channel { Application, Security, Setup, System, ForwardedEvents }

impl Channel {
    pub const ALL: [Channel; 5] = [Channel::Application, Channel::Security, Channel::Setup, Channel::System, Channel::ForwardedEvents];

    /// Name used by the event log API and by the `.evtx` file on disk.
    pub fn path_name(self) -> &'static str {
        match self {
            Channel::Application => "Application",
            Channel::Security => "Security",
            Channel::Setup => "Setup",
            Channel::System => "System",
            Channel::ForwardedEvents => "ForwardedEvents",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self { Channel::ForwardedEvents => "Forwarded Events", other => other.path_name() }
    }

    pub fn needs_elevation(self) -> bool { matches!(self, Channel::Security) }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result { f.write_str(self.display_name()) }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RawEventRecord {
    /// Raw identifier including qualifier bits; `None` when the record had no usable id.
    pub event_id: Option<u32>,
    pub source: String,
    pub level: u8,
    pub keywords: u64,
    pub category: Option<String>,
    pub time: DateTime<Utc>,
    pub description: String,
}

impl RawEventRecord {
    pub fn normalized_id(&self) -> Option<u16> { self.event_id.map(normalize_event_id) }
    pub fn level_label(&self) -> String { level_label(self.level, self.keywords) }
}

pub fn normalize_event_id(raw: u32) -> u16 { (raw & 0xFFFF) as u16 }

pub fn level_label(level: u8, keywords: u64) -> String {
    match level {
        0 if keywords & AUDIT_FAILURE_KEYWORD != 0 => "AUDIT_FAILURE".to_string(),
        0 if keywords & AUDIT_SUCCESS_KEYWORD != 0 => "AUDIT_SUCCESS".to_string(),
        0 | 4 => "INFORMATIONAL".to_string(),
        1 => "CRITICAL".to_string(),
        2 => "ERROR".to_string(),
        3 => "WARNING".to_string(),
        5 => "VERBOSE".to_string(),
        other => other.to_string(),
    }
}

/// One aggregated line of the report.
#[derive(Clone, Debug, PartialEq)]
pub struct SummaryRow {
    pub serial: usize,
    pub event_id: u16,
    pub sources: Vec<String>,
    pub levels: Vec<String>,
    pub category: Option<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub descriptions: Vec<String>,
    pub frequency: usize,
}
