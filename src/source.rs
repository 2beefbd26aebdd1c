use std::path::{Path, PathBuf};

use chrono::{DateTime, SubsecRound, Utc};
use evtx::EvtxParser;
use globset::GlobBuilder;
use walkdir::WalkDir;

use crate::error::AppError;
use crate::event_xml::parse_event_xml;
use crate::model::{Channel, RawEventRecord};

/// Records matching one query plus how many were looked at.
#[derive(Debug, Default)]
pub struct EventBatch {
    pub records: Vec<RawEventRecord>,
    pub scanned: usize,
    /// Records that could not be rendered or decoded.
    pub unreadable: usize,
}

impl EventBatch {
    /// Keeps `rec` if it falls in the window; `None` counts as unreadable.
    pub fn offer(&mut self, rec: Option<RawEventRecord>, start: DateTime<Utc>, end: DateTime<Utc>) {
        match rec {
            Some(rec) if in_window(rec.time, start, end) => self.records.push(rec),
            Some(_) => {}
            None => self.unreadable += 1,
        }
    }
}

pub trait RecordSource {
    /// Records of `channel` created within `[start, end]`, both bounds inclusive.
    fn fetch(&mut self, channel: Channel, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<EventBatch, AppError>;
    fn describe(&self) -> String;
}

/// `end` is compared at whole seconds so that `23:59:59` covers the full last second.
fn in_window(t: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    t >= start && t.trunc_subsecs(0) <= end
}

#[derive(Clone, Debug, Default)]
pub struct SourceOptions {
    pub evtx_dir: Option<PathBuf>,
    pub include_archives: bool,
    pub progress: bool,
}

pub fn open_source(opts: &SourceOptions) -> Result<Box<dyn RecordSource>, AppError> {
    if let Some(dir) = opts.evtx_dir.as_ref() {
        return Ok(Box::new(EvtxDirSource::new(dir.clone(), opts.include_archives, opts.progress)));
    }
    #[cfg(windows)]
    {
        Ok(Box::new(crate::windows_live::LiveSource::new(opts.progress)))
    }
    #[cfg(not(windows))]
    {
        Err(AppError::MissingDependency {
            what: "the Windows Event Log API is only available on Windows".to_string(),
            hint: "Copy the .evtx files (C:\\Windows\\System32\\winevt\\Logs) to this machine and pass --evtx-dir <dir> or set evtx_dir in EventSummary.toml.".to_string(),
        })
    }
}

/// Reads exported or copied `.evtx` files from a directory.
pub struct EvtxDirSource {
    dir: PathBuf,
    include_archives: bool,
    progress: bool,
}

impl EvtxDirSource {
    pub fn new(dir: PathBuf, include_archives: bool, progress: bool) -> Self { Self { dir, include_archives, progress } }

    /// `<Channel>.evtx` first, then `Archive-<Channel>-*.evtx` oldest name first.
    pub fn files_for(&self, channel: Channel) -> Result<Vec<PathBuf>, AppError> {
        let not_found = || AppError::ChannelNotFound { channel: channel.path_name().to_string(), location: Some(self.dir.clone()) };
        if !self.dir.is_dir() { return Err(not_found()); }
        let live = GlobBuilder::new(&format!("{}.evtx", channel.path_name())).case_insensitive(true).build();
        let archive = GlobBuilder::new(&format!("Archive-{}-*.evtx", channel.path_name())).case_insensitive(true).build();
        let (live, archive) = match (live, archive) {
            (Ok(l), Ok(a)) => (l.compile_matcher(), a.compile_matcher()),
            (Err(e), _) | (_, Err(e)) => return Err(AppError::Query { channel: channel.path_name().to_string(), detail: e.to_string() }),
        };
        let mut current = Vec::new();
        let mut archived = Vec::new();
        for de in WalkDir::new(&self.dir).max_depth(1).into_iter().filter_map(Result::ok) {
            let fp = de.path();
            if !fp.is_file() { continue; }
            let Some(name) = fp.file_name() else { continue };
            if live.is_match(name) { current.push(fp.to_path_buf()); }
            else if self.include_archives && archive.is_match(name) { archived.push(fp.to_path_buf()); }
        }
        archived.sort();
        current.extend(archived);
        if current.is_empty() { return Err(not_found()); }
        Ok(current)
    }

    fn read_file(&self, path: &Path, channel: Channel, start: DateTime<Utc>, end: DateTime<Utc>, batch: &mut EventBatch) -> Result<(), AppError> {
        let file = std::fs::File::open(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::PermissionDenied => AppError::PermissionDenied { channel: path.to_string_lossy().into_owned() },
            _ => AppError::io(format!("open {}", path.display()), e),
        })?;
        let mut parser = EvtxParser::from_read_seek(file).map_err(|e| AppError::Query { channel: channel.path_name().to_string(), detail: format!("{}: {}", path.display(), e) })?;
        let pb = if self.progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
        if let Some(ref pb) = pb { pb.set_message(format!("Scanning {}", path.display())); }
        let before = batch.unreadable;
        for r in parser.records() {
            batch.scanned += 1;
            if let Some(ref pb) = pb && batch.scanned % 500 == 0 { pb.tick(); pb.set_message(format!("Scanned {} records", batch.scanned)); }
            let rec = match r {
                Ok(r) => parse_event_xml(&r.data).and_then(|ev| ev.into_record(None, None)),
                Err(e) => { log::debug!("Unreadable record in {}: {}", path.display(), e); None }
            };
            batch.offer(rec, start, end);
        }
        if let Some(pb) = pb { pb.finish_and_clear(); }
        let bad = batch.unreadable - before;
        if bad > 0 { log::warn!("{} unreadable records skipped in {}", bad, path.display()); }
        Ok(())
    }
}

impl RecordSource for EvtxDirSource {
    fn fetch(&mut self, channel: Channel, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<EventBatch, AppError> {
        let mut batch = EventBatch::default();
        for path in self.files_for(channel)? {
            log::info!("Reading {}", path.display());
            self.read_file(&path, channel, start, end, &mut batch)?;
        }
        batch.records.sort_by_key(|r| r.time);
        Ok(batch)
    }

    fn describe(&self) -> String { format!("EVTX files in {}", self.dir.display()) }
}
