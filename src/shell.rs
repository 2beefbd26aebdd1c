//! Interactive prompts: channel menu, time window, confirmation.
//!
//! The prompter is generic over its input and output so the whole dialogue can
//! be driven from a byte buffer in tests. `q` at any prompt, or end of input,
//! yields [`AppError::Cancelled`].

use std::io::{BufRead, Write};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeZone as _, Utc};

use crate::TimeZone;
use crate::error::AppError;
use crate::model::Channel;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputPrecision { Date, Minutes, Seconds }

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM` and `YYYY-MM-DD HH:MM:SS`.
pub fn parse_datetime_input(s: &str) -> Option<(NaiveDateTime, InputPrecision)> {
    let s = s.trim();
    if s.is_empty() { return None; }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") { return Some((d.and_time(NaiveTime::MIN), InputPrecision::Date)); }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") { return Some((dt, InputPrecision::Seconds)); }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M") { return Some((dt, InputPrecision::Minutes)); }
    None
}

/// A date-only end covers the whole day.
pub fn normalize_end(dt: NaiveDateTime, precision: InputPrecision) -> NaiveDateTime {
    match precision {
        InputPrecision::Date => dt.date().and_hms_opt(23, 59, 59).unwrap_or(dt),
        _ => dt,
    }
}

pub fn validate_range(start: NaiveDateTime, end: NaiveDateTime, now: NaiveDateTime) -> Result<(), AppError> {
    if start > end { return Err(AppError::Validation("start datetime is after end datetime".to_string())); }
    if end > now { return Err(AppError::Validation("end datetime is in the future; supply a timeframe fully in the past".to_string())); }
    Ok(())
}

/// Converts an entered wall-clock time to UTC in the configured zone.
pub fn to_utc(dt: NaiveDateTime, tz: TimeZone) -> Result<DateTime<Utc>, AppError> {
    match tz {
        TimeZone::Utc => Ok(dt.and_utc()),
        TimeZone::Local => Local.from_local_datetime(&dt).earliest()
            .map(|l| l.with_timezone(&Utc))
            .ok_or_else(|| AppError::Validation(format!("{} does not exist in local time", dt))),
    }
}

pub fn now_in(tz: TimeZone) -> NaiveDateTime {
    match tz { TimeZone::Local => Local::now().naive_local(), TimeZone::Utc => Utc::now().naive_utc() }
}

/// Matches a menu number or a channel name (case-insensitive, spaces optional).
pub fn parse_channel_choice(s: &str) -> Option<Channel> {
    let s = s.trim();
    if let Ok(n) = s.parse::<usize>() { return n.checked_sub(1).and_then(|i| Channel::ALL.get(i).copied()); }
    let wanted = s.replace(' ', "").to_lowercase();
    Channel::ALL.iter().copied().find(|c| c.path_name().to_lowercase() == wanted || c.display_name().replace(' ', "").to_lowercase() == wanted)
}

#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub channel: Channel,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

pub struct Prompter<R, W> {
    input: R,
    out: W,
    tz: TimeZone,
}

impl<R: BufRead, W: Write> Prompter<R, W> {
    pub fn new(input: R, out: W, tz: TimeZone) -> Self { Self { input, out, tz } }

    fn ask(&mut self, prompt: &str) -> Result<String, AppError> {
        write!(self.out, "{}", prompt).map_err(|e| AppError::io("write prompt", e))?;
        self.out.flush().map_err(|e| AppError::io("write prompt", e))?;
        let mut line = String::new();
        let n = self.input.read_line(&mut line).map_err(|e| AppError::io("read input", e))?;
        if n == 0 { return Err(AppError::Cancelled); }
        let line = line.trim().to_string();
        if line.eq_ignore_ascii_case("q") { return Err(AppError::Cancelled); }
        Ok(line)
    }

    fn say(&mut self, msg: &str) -> Result<(), AppError> {
        writeln!(self.out, "{}", msg).map_err(|e| AppError::io("write output", e))
    }

    pub fn choose_channel(&mut self) -> Result<Channel, AppError> {
        self.say("Choose which Windows Event Log to read from (type number or name). Type 'q' to quit.")?;
        for (i, c) in Channel::ALL.iter().enumerate() { self.say(&format!("  {}. {}", i + 1, c))?; }
        loop {
            let answer = self.ask("Enter choice: ")?;
            match parse_channel_choice(&answer) {
                Some(c) => {
                    self.say(&format!("Selected: {}", c))?;
                    if c.needs_elevation() { self.say("Note: reading this log usually requires Administrator rights.")?; }
                    return Ok(c);
                }
                None if answer.chars().all(|ch| ch.is_ascii_digit()) && !answer.is_empty() => self.say("Number out of range, try again.")?,
                None => self.say("Unrecognized choice. Enter the number or the log name (e.g. Application).")?,
            }
        }
    }

    /// Loops until a valid, fully past window is entered; returns it as wall-clock times.
    pub fn ask_range(&mut self, now: NaiveDateTime) -> Result<(NaiveDateTime, NaiveDateTime), AppError> {
        self.say("")?;
        self.say("Enter start and end datetimes for the query window.")?;
        self.say("Accepted formats: 'YYYY-MM-DD' or 'YYYY-MM-DD HH:MM' or 'YYYY-MM-DD HH:MM:SS'.")?;
        self.say("Type 'q' to quit at any prompt.")?;
        loop {
            let Some((start, _)) = parse_datetime_input(&self.ask("Start datetime: ")?) else {
                self.say("Could not parse start datetime. Please follow the allowed formats.")?;
                continue;
            };
            let Some((end, precision)) = parse_datetime_input(&self.ask("End datetime: ")?) else {
                self.say("Could not parse end datetime. Please follow the allowed formats.")?;
                continue;
            };
            let end = normalize_end(end, precision);
            if let Err(e) = validate_range(start, end, now) {
                self.say(&format!("Error: {}. Please re-enter.", e))?;
                continue;
            }
            let zone = match self.tz { TimeZone::Local => "system local time", TimeZone::Utc => "UTC" };
            self.say(&format!("Accepted range: {}  ->  {} ({})", start, end, zone))?;
            return Ok((start, end));
        }
    }

    pub fn confirm(&mut self, question: &str) -> Result<bool, AppError> {
        self.say("")?;
        self.say(question)?;
        let a = self.ask("> ")?.to_lowercase();
        Ok(a == "y" || a == "yes")
    }

    /// Channel and window, already converted to UTC.
    pub fn select(&mut self, now: NaiveDateTime) -> Result<Selection, AppError> {
        let channel = self.choose_channel()?;
        loop {
            let (start, end) = self.ask_range(now)?;
            match (to_utc(start, self.tz), to_utc(end, self.tz)) {
                (Ok(start), Ok(end)) => return Ok(Selection { channel, start, end }),
                (Err(e), _) | (_, Err(e)) => self.say(&format!("Error: {}. Please re-enter.", e))?,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn now() -> NaiveDateTime { NaiveDateTime::parse_from_str("2025-01-15 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap() }

    fn prompter(input: &str) -> Prompter<Cursor<Vec<u8>>, Vec<u8>> {
        Prompter::new(Cursor::new(input.as_bytes().to_vec()), Vec::new(), TimeZone::Utc)
    }

    #[test]
    fn parses_the_three_formats() {
        assert_eq!(parse_datetime_input("2024-09-01").unwrap().1, InputPrecision::Date);
        assert_eq!(parse_datetime_input(" 2024-09-01 07:30 ").unwrap().1, InputPrecision::Minutes);
        let (dt, p) = parse_datetime_input("2024-09-01 07:30:15").unwrap();
        assert_eq!(p, InputPrecision::Seconds);
        assert_eq!(dt.to_string(), "2024-09-01 07:30:15");
        assert!(parse_datetime_input("01/09/2024").is_none());
        assert!(parse_datetime_input("2024-09-01T07:30").is_none());
        assert!(parse_datetime_input("").is_none());
    }

    #[test]
    fn date_only_end_is_end_of_day() {
        let (d, p) = parse_datetime_input("2024-09-01").unwrap();
        assert_eq!(normalize_end(d, p).to_string(), "2024-09-01 23:59:59");
        let (d, p) = parse_datetime_input("2024-09-01 10:00").unwrap();
        assert_eq!(normalize_end(d, p).to_string(), "2024-09-01 10:00:00");
    }

    #[test]
    fn range_validation() {
        let a = parse_datetime_input("2024-09-02").unwrap().0;
        let b = parse_datetime_input("2024-09-01").unwrap().0;
        assert!(matches!(validate_range(a, b, now()), Err(AppError::Validation(_))));
        assert!(validate_range(b, a, now()).is_ok());
        assert!(validate_range(a, a, now()).is_ok());
        let future = parse_datetime_input("2030-01-01").unwrap().0;
        assert!(validate_range(b, future, now()).is_err());
    }

    #[test]
    fn channel_choice_by_number_or_name() {
        assert_eq!(parse_channel_choice("1"), Some(Channel::Application));
        assert_eq!(parse_channel_choice("5"), Some(Channel::ForwardedEvents));
        assert_eq!(parse_channel_choice("0"), None);
        assert_eq!(parse_channel_choice("6"), None);
        assert_eq!(parse_channel_choice("system"), Some(Channel::System));
        assert_eq!(parse_channel_choice("Forwarded Events"), Some(Channel::ForwardedEvents));
        assert_eq!(parse_channel_choice("forwardedevents"), Some(Channel::ForwardedEvents));
        assert_eq!(parse_channel_choice("Sys"), None);
    }

    #[test]
    fn full_dialogue_with_retries() {
        let mut p = prompter("9\nbogus\n4\nnot a date\n2024-09-02\n2024-09-01\n2024-09-01\n2024-09-01\n");
        let sel = p.select(now()).unwrap();
        assert_eq!(sel.channel, Channel::System);
        assert_eq!(sel.start.to_rfc3339(), "2024-09-01T00:00:00+00:00");
        assert_eq!(sel.end.to_rfc3339(), "2024-09-01T23:59:59+00:00");
        let out = String::from_utf8(p.out).unwrap();
        assert!(out.contains("Number out of range"));
        assert!(out.contains("Unrecognized choice"));
        assert!(out.contains("Could not parse start datetime"));
        assert!(out.contains("start datetime is after end datetime"));
        assert!(out.contains("Accepted range: 2024-09-01 00:00:00  ->  2024-09-01 23:59:59 (UTC)"));
    }

    #[test]
    fn future_end_is_reprompted() {
        let mut p = prompter("2024-09-01\n2099-01-01\n2024-09-01 08:00\n2024-09-01 09:30\n");
        let (s, e) = p.ask_range(now()).unwrap();
        assert_eq!(s.to_string(), "2024-09-01 08:00:00");
        assert_eq!(e.to_string(), "2024-09-01 09:30:00");
        assert!(String::from_utf8(p.out).unwrap().contains("in the future"));
    }

    #[test]
    fn quit_and_eof_cancel() {
        assert!(matches!(prompter("q\n").choose_channel(), Err(AppError::Cancelled)));
        assert!(matches!(prompter("2\nQ\n").select(now()), Err(AppError::Cancelled)));
        assert!(matches!(prompter("").choose_channel(), Err(AppError::Cancelled)));
    }

    #[test]
    fn security_choice_warns_about_elevation() {
        let mut p = prompter("Security\n");
        assert_eq!(p.choose_channel().unwrap(), Channel::Security);
        assert!(String::from_utf8(p.out).unwrap().contains("Administrator"));
    }

    #[test]
    fn confirmation_accepts_y_and_yes_only() {
        assert!(prompter("y\n").confirm("Proceed?").unwrap());
        assert!(prompter("YES\n").confirm("Proceed?").unwrap());
        assert!(!prompter("n\n").confirm("Proceed?").unwrap());
        assert!(!prompter("sure\n").confirm("Proceed?").unwrap());
    }

    #[test]
    fn utc_zone_is_identity() {
        let dt = parse_datetime_input("2024-09-01 10:00").unwrap().0;
        assert_eq!(to_utc(dt, TimeZone::Utc).unwrap().to_rfc3339(), "2024-09-01T10:00:00+00:00");
    }
}
