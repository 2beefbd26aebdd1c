use chrono::{DateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::{BytesStart, Event as XmlEvent};

use crate::model::{NO_DESCRIPTION, RawEventRecord, UNKNOWN_SOURCE};

/// One `<Data>` value (or `UserData` leaf) in document order.
#[derive(Clone, Debug, PartialEq)]
pub struct DataItem {
    pub name: Option<String>,
    pub value: String,
}

/// Fields of the `<System>` block plus the insertion strings.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EventXml {
    pub time: Option<DateTime<Utc>>,
    pub provider: String,
    pub source_name: Option<String>,
    pub event_id: Option<u32>,
    pub qualifiers: Option<u32>,
    pub level: u8,
    pub task: Option<u16>,
    pub keywords: u64,
    pub channel: String,
    pub data: Vec<DataItem>,
}

impl EventXml {
    /// Identifier as the classic API reports it: qualifiers in the high word.
    pub fn raw_event_id(&self) -> Option<u32> {
        let id = self.event_id?;
        Some(match self.qualifiers { Some(q) => (q << 16) | (id & 0xFFFF), None => id })
    }

    pub fn source(&self) -> String {
        self.source_name.clone().filter(|s| !s.is_empty())
            .or_else(|| Some(self.provider.clone()).filter(|s| !s.is_empty()))
            .unwrap_or_else(|| UNKNOWN_SOURCE.to_string())
    }

    pub fn task_label(&self) -> Option<String> {
        self.task.map(|t| if t == 0 { "None".to_string() } else { t.to_string() })
    }

    pub fn data_value(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|n| self.data.iter().find(|d| d.name.as_deref() == Some(*n)).map(|d| d.value.as_str()))
    }

    /// Insertion strings joined with a space, like the classic viewer shows when no template exists.
    pub fn joined_inserts(&self) -> Option<String> {
        let s = self.data.iter().map(|d| d.value.as_str()).filter(|v| !v.is_empty()).collect::<Vec<_>>().join(" ");
        if s.trim().is_empty() { None } else { Some(s.trim().to_string()) }
    }

    /// Best description available without a message template.
    pub fn fallback_description(&self) -> Option<String> {
        crate::decoder::describe(self).or_else(|| self.joined_inserts())
    }

    /// Builds the record; `message` and `task_name` come from the publisher when it could be resolved.
    pub fn into_record(self, message: Option<String>, task_name: Option<String>) -> Option<RawEventRecord> {
        let time = self.time?;
        let description = message.map(|m| m.trim().to_string()).filter(|m| !m.is_empty())
            .or_else(|| self.fallback_description())
            .unwrap_or_else(|| NO_DESCRIPTION.to_string());
        let category = task_name.filter(|t| !t.trim().is_empty()).or_else(|| self.task_label());
        Some(RawEventRecord {
            event_id: self.raw_event_id(),
            source: self.source(),
            level: self.level,
            keywords: self.keywords,
            category,
            time,
            description,
        })
    }
}

fn attr(e: &BytesStart<'_>, key: &str) -> Option<String> {
    e.attributes().flatten()
        .find(|a| a.key.local_name().as_ref() == key.as_bytes())
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_keywords(s: &str) -> u64 {
    let t = s.trim();
    match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).unwrap_or(0),
        None => t.parse().unwrap_or(0),
    }
}

pub fn parse_system_time(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) { return Some(dt.with_timezone(&Utc)); }
    let mut alt = s.replace(' ', "T");
    if !alt.ends_with('Z') && !alt.contains('+') { alt.push('Z'); }
    if let Ok(dt) = DateTime::parse_from_rfc3339(&alt) { return Some(dt.with_timezone(&Utc)); }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f").ok().map(|n| n.and_utc())
}

#[derive(PartialEq)]
enum Section { Other, System, EventData, UserData }

/// Parses an event rendered as XML (live `EvtRender` output or `evtx` records).
/// Returns `None` if the document is not well formed.
pub fn parse_event_xml(xml: &str) -> Option<EventXml> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut ev = EventXml::default();
    let mut section = Section::Other;
    let mut stack: Vec<String> = Vec::new();
    let mut data_name: Option<String> = None;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(XmlEvent::Start(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match name.as_str() {
                    "System" => section = Section::System,
                    "EventData" => section = Section::EventData,
                    "UserData" => section = Section::UserData,
                    _ => {}
                }
                system_attrs(&mut ev, &section, &name, &e);
                if section == Section::EventData && name == "Data" { data_name = attr(&e, "Name"); }
                stack.push(name);
            }
            Ok(XmlEvent::Empty(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                system_attrs(&mut ev, &section, &name, &e);
            }
            Ok(XmlEvent::End(_)) => {
                if let Some(name) = stack.pop() {
                    match name.as_str() {
                        "System" | "EventData" | "UserData" => section = Section::Other,
                        "Data" => data_name = None,
                        _ => {}
                    }
                }
            }
            Ok(XmlEvent::Text(t)) => {
                let v = match t.unescape() { Ok(v) => v.into_owned(), Err(_) => String::from_utf8_lossy(t.as_ref()).into_owned() };
                let cur = stack.last().map(String::as_str).unwrap_or("");
                match section {
                    Section::System => match cur {
                        "EventID" => ev.event_id = v.trim().parse().ok(),
                        "Level" => ev.level = v.trim().parse().unwrap_or(0),
                        "Task" => ev.task = v.trim().parse().ok(),
                        "Keywords" => ev.keywords = parse_keywords(&v),
                        "Channel" => ev.channel = v,
                        _ => {}
                    },
                    Section::EventData if cur == "Data" => ev.data.push(DataItem { name: data_name.clone(), value: v.trim().to_string() }),
                    Section::UserData => ev.data.push(DataItem { name: Some(cur.to_string()), value: v.trim().to_string() }),
                    _ => {}
                }
            }
            Ok(XmlEvent::Eof) => break,
            Err(e) => { log::debug!("Malformed event XML at {}: {}", reader.buffer_position(), e); return None; }
            _ => {}
        }
        buf.clear();
    }
    Some(ev)
}

fn system_attrs(ev: &mut EventXml, section: &Section, name: &str, e: &BytesStart<'_>) {
    if *section != Section::System { return; }
    match name {
        "Provider" => {
            if let Some(n) = attr(e, "Name") { ev.provider = n; }
            ev.source_name = attr(e, "EventSourceName");
        }
        "EventID" => ev.qualifiers = attr(e, "Qualifiers").and_then(|q| q.trim().parse().ok()),
        "TimeCreated" => ev.time = attr(e, "SystemTime").and_then(|s| parse_system_time(&s)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SCM_XML: &str = r#"<Event xmlns="http://schemas.microsoft.com/win/2004/08/events/event"><System><Provider Name="Service Control Manager" Guid="{555908d1-a6d7-4695-8e1e-26931d2012f4}" EventSourceName="Service Control Manager"/><EventID Qualifiers="49152">7000</EventID><Version>0</Version><Level>2</Level><Task>0</Task><Keywords>0x8080000000000000</Keywords><TimeCreated SystemTime="2024-09-01T10:15:30.1234567Z"/><Channel>System</Channel></System><EventData><Data Name="param1">Spooler</Data><Data Name="param2">%%1053</Data></EventData></Event>"#;

    #[test]
    fn parses_system_block() {
        let ev = parse_event_xml(SCM_XML).unwrap();
        assert_eq!(ev.provider, "Service Control Manager");
        assert_eq!(ev.event_id, Some(7000));
        assert_eq!(ev.qualifiers, Some(49152));
        assert_eq!(ev.level, 2);
        assert_eq!(ev.task, Some(0));
        assert_eq!(ev.keywords, 0x8080_0000_0000_0000);
        assert_eq!(ev.channel, "System");
        assert_eq!(ev.time.unwrap().timestamp(), Utc.with_ymd_and_hms(2024, 9, 1, 10, 15, 30).unwrap().timestamp());
        assert_eq!(ev.data_value(&["param1"]), Some("Spooler"));
    }

    #[test]
    fn raw_id_carries_qualifiers() {
        let ev = parse_event_xml(SCM_XML).unwrap();
        assert_eq!(ev.raw_event_id(), Some((49152 << 16) | 7000));
        let rec = ev.into_record(None, None).unwrap();
        assert_eq!(rec.normalized_id(), Some(7000));
        assert_eq!(rec.category.as_deref(), Some("None"));
    }

    #[test]
    fn prefers_event_source_name() {
        let xml = r#"<Event><System><Provider Name="Microsoft-Windows-Security-SPP" EventSourceName="Software Protection Platform Service"/><EventID>16384</EventID><Level>4</Level><TimeCreated SystemTime="2024-09-01T10:00:00Z"/></System></Event>"#;
        let ev = parse_event_xml(xml).unwrap();
        assert_eq!(ev.source(), "Software Protection Platform Service");
        let bare = parse_event_xml("<Event><System><EventID>1</EventID></System></Event>").unwrap();
        assert_eq!(bare.source(), UNKNOWN_SOURCE);
    }

    #[test]
    fn collects_user_data_leaves() {
        let xml = r#"<Event><System><Provider Name="Microsoft-Windows-Eventlog"/><EventID>1102</EventID><Level>4</Level><TimeCreated SystemTime="2024-09-01T10:00:00Z"/></System><UserData><LogFileCleared><SubjectUserName>alice</SubjectUserName><SubjectDomainName>CORP</SubjectDomainName></LogFileCleared></UserData></Event>"#;
        let ev = parse_event_xml(xml).unwrap();
        assert_eq!(ev.data_value(&["SubjectUserName"]), Some("alice"));
        assert_eq!(ev.joined_inserts().as_deref(), Some("alice CORP"));
    }

    #[test]
    fn message_overrides_fallback_and_missing_text_gets_placeholder() {
        let xml = r#"<Event><System><Provider Name="Custom"/><EventID>5</EventID><Level>3</Level><TimeCreated SystemTime="2024-09-01T10:00:00Z"/></System><EventData></EventData></Event>"#;
        let rec = parse_event_xml(xml).unwrap().into_record(Some("  Rendered text \r\n".to_string()), Some("Disk".to_string())).unwrap();
        assert_eq!(rec.description, "Rendered text");
        assert_eq!(rec.category.as_deref(), Some("Disk"));
        let rec = parse_event_xml(xml).unwrap().into_record(None, None).unwrap();
        assert_eq!(rec.description, NO_DESCRIPTION);
        assert_eq!(rec.category, None);
    }

    #[test]
    fn unescapes_data_text() {
        let xml = r#"<Event><System><EventID>1</EventID><TimeCreated SystemTime="2024-09-01T10:00:00Z"/></System><EventData><Data>a &amp; b</Data></EventData></Event>"#;
        let ev = parse_event_xml(xml).unwrap();
        assert_eq!(ev.data[0].value, "a & b");
        assert_eq!(ev.data[0].name, None);
    }

    #[test]
    fn record_without_time_is_dropped() {
        let ev = parse_event_xml("<Event><System><EventID>1</EventID></System></Event>").unwrap();
        assert!(ev.into_record(None, None).is_none());
    }

    #[test]
    fn missing_event_id_is_kept_as_none() {
        let xml = r#"<Event><System><EventID>abc</EventID><TimeCreated SystemTime="2024-09-01T10:00:00Z"/></System></Event>"#;
        let rec = parse_event_xml(xml).unwrap().into_record(None, None).unwrap();
        assert_eq!(rec.event_id, None);
    }

    #[test]
    fn keywords_accept_hex_and_decimal() {
        assert_eq!(parse_keywords("0x10"), 16);
        assert_eq!(parse_keywords("32"), 32);
        assert_eq!(parse_keywords("junk"), 0);
    }

    #[test]
    fn system_time_variants() {
        assert!(parse_system_time("2024-09-01T10:00:00Z").is_some());
        assert!(parse_system_time("2024-09-01 10:00:00.123").is_some());
        assert!(parse_system_time("yesterday").is_none());
    }
}
