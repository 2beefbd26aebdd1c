use std::collections::HashMap;
use std::ptr;

use chrono::{DateTime, Duration, Utc};
use windows_sys::Win32::Foundation::GetLastError;
use windows_sys::Win32::System::EventLog::*;

use crate::error::AppError;
use crate::event_xml::parse_event_xml;
use crate::model::Channel;
use crate::source::{EventBatch, RecordSource};

const ERROR_FILE_NOT_FOUND: u32 = 2;
const ERROR_ACCESS_DENIED: u32 = 5;
const ERROR_INSUFFICIENT_BUFFER: u32 = 122;
const ERROR_NO_MORE_ITEMS: u32 = 259;
const ERROR_EVT_CHANNEL_NOT_FOUND: u32 = 15007;
const INFINITE: u32 = u32::MAX;

struct Handle(EVT_HANDLE);
impl Drop for Handle { fn drop(&mut self) { unsafe { EvtClose(self.0); } } }

fn w(s: &str) -> Vec<u16> { let mut v = s.encode_utf16().collect::<Vec<u16>>(); v.push(0); v }

fn query_error(channel: Channel, code: u32) -> AppError {
    match code {
        ERROR_ACCESS_DENIED => AppError::PermissionDenied { channel: channel.path_name().to_string() },
        ERROR_EVT_CHANNEL_NOT_FOUND | ERROR_FILE_NOT_FOUND => AppError::ChannelNotFound { channel: channel.path_name().to_string(), location: None },
        other => AppError::Query { channel: channel.path_name().to_string(), detail: format!("Win32 error {}", other) },
    }
}

/// Reads a channel through the Windows Event Log service and resolves message text
/// via publisher metadata.
pub struct LiveSource {
    progress: bool,
    publishers: HashMap<String, Option<Handle>>,
}

impl LiveSource {
    pub fn new(progress: bool) -> Self { Self { progress, publishers: HashMap::new() } }

    fn publisher(&mut self, provider: &str) -> Option<EVT_HANDLE> {
        if provider.is_empty() { return None; }
        self.publishers.entry(provider.to_string()).or_insert_with(|| {
            let h = unsafe { EvtOpenPublisherMetadata(0, w(provider).as_ptr(), ptr::null(), 0, 0) };
            if h == 0 {
                log::debug!("No publisher metadata for {}: {}", provider, unsafe { GetLastError() });
                None
            } else { Some(Handle(h)) }
        }).as_ref().map(|h| h.0)
    }
}

fn xpath(start: DateTime<Utc>, end: DateTime<Utc>) -> String {
    let fmt = "%Y-%m-%dT%H:%M:%S%.3fZ";
    let until = end + Duration::seconds(1);
    format!("*[System[TimeCreated[@SystemTime&gt;='{}' and @SystemTime&lt;'{}']]]", start.format(fmt), until.format(fmt))
}

impl RecordSource for LiveSource {
    fn fetch(&mut self, channel: Channel, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<EventBatch, AppError> {
        let q = format!("<QueryList><Query Id=\"0\"><Select Path=\"{}\">{}</Select></Query></QueryList>", channel.path_name(), xpath(start, end));
        log::debug!("EvtQuery {}", q);
        let h = unsafe { EvtQuery(0, ptr::null(), w(&q).as_ptr(), EvtQueryChannelPath | EvtQueryForwardDirection) };
        if h == 0 { return Err(query_error(channel, unsafe { GetLastError() })); }
        let h = Handle(h);
        let mut batch = EventBatch::default();
        let pb = if self.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
        if let Some(ref pb) = pb { pb.set_message(format!("Scanning {}", channel)); }
        let mut arr: [EVT_HANDLE; 64] = [0; 64];
        loop {
            let mut returned: u32 = 0;
            let ok = unsafe { EvtNext(h.0, arr.len() as u32, arr.as_mut_ptr(), INFINITE, 0, &mut returned) };
            if ok == 0 {
                let code = unsafe { GetLastError() };
                if code == ERROR_NO_MORE_ITEMS { break; }
                return Err(query_error(channel, code));
            }
            if returned == 0 { break; }
            for &ev in arr.iter().take(returned as usize) {
                let ev = Handle(ev);
                batch.scanned += 1;
                if let Some(ref pb) = pb && batch.scanned % 500 == 0 { pb.tick(); pb.set_message(format!("Scanned {} records", batch.scanned)); }
                let Some(parsed) = (unsafe { render_xml(ev.0) }).and_then(|xml| parse_event_xml(&xml)) else { batch.offer(None, start, end); continue };
                let (message, task) = match self.publisher(&parsed.provider) {
                    Some(p) => unsafe { (format_message(p, ev.0, EvtFormatMessageEvent as u32), format_message(p, ev.0, EvtFormatMessageTask as u32)) },
                    None => (None, None),
                };
                batch.offer(parsed.into_record(message, task), start, end);
            }
        }
        if let Some(pb) = pb { pb.finish_and_clear(); }
        if batch.unreadable > 0 { log::warn!("{} unreadable records skipped in {}", batch.unreadable, channel.path_name()); }
        Ok(batch)
    }

    fn describe(&self) -> String { "Windows Event Log service".to_string() }
}

unsafe fn render_xml(ev: EVT_HANDLE) -> Option<String> {
    let mut used: u32 = 0;
    let mut count: u32 = 0;
    let ok = unsafe { EvtRender(0, ev, EvtRenderEventXml, 0, ptr::null_mut(), &mut used, &mut count) };
    let need = if ok == 0 { used } else { 0 };
    if need == 0 { return None; }
    let mut buf: Vec<u16> = vec![0u16; (need as usize).div_ceil(2)];
    if unsafe { EvtRender(0, ev, EvtRenderEventXml, need, buf.as_mut_ptr() as *mut _, &mut used, &mut count) } != 0 {
        let s = String::from_utf16_lossy(&buf);
        Some(s.trim_matches(char::from(0)).to_string())
    } else { None }
}

/// `flags` selects what to format (event message, task name...). Sizes are in characters.
unsafe fn format_message(publisher: EVT_HANDLE, ev: EVT_HANDLE, flags: u32) -> Option<String> {
    let mut used: u32 = 0;
    let ok = unsafe { EvtFormatMessage(publisher, ev, 0, 0, ptr::null(), flags, 0, ptr::null_mut(), &mut used) };
    if ok != 0 || used == 0 { return None; }
    if unsafe { GetLastError() } != ERROR_INSUFFICIENT_BUFFER { return None; }
    let mut buf: Vec<u16> = vec![0u16; used as usize];
    if unsafe { EvtFormatMessage(publisher, ev, 0, 0, ptr::null(), flags, used, buf.as_mut_ptr(), &mut used) } == 0 { return None; }
    let s = String::from_utf16_lossy(&buf);
    let s = s.trim_matches(char::from(0)).trim().to_string();
    if s.is_empty() { None } else { Some(s) }
}
