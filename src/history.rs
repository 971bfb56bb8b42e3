//! Reading-session history and daily reports.
//!
//! Each finished session is appended as one JSON line to
//! `<dir>/<YYYY-MM-DD>.jsonl`.

use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// `<data dir>/readpace/history`, if a data directory is known.
pub fn default_history_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join("readpace").join("history"))
}

fn history_file(dir: &Path, date: &str) -> PathBuf {
    let date_str = if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    };
    dir.join(format!("{date_str}.jsonl"))
}

/// Summary of one reading session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub timestamp: DateTime<Local>,
    pub book_id: String,
    pub title: String,
    pub start_index: usize,
    pub end_index: usize,
    pub total_words: usize,
    pub words_read: usize,
    pub elapsed_s: f64,
    pub wpm: u32,
    pub finished: bool,
}

/// Append a session record to the history file for its date.
pub fn save_record(dir: &Path, record: &SessionRecord) {
    if let Err(e) = fs::create_dir_all(dir) {
        error!("Failed to create history dir: {e}");
        return;
    }

    let path = history_file(dir, &record.timestamp.format("%Y-%m-%d").to_string());
    match fs::OpenOptions::new().create(true).append(true).open(&path) {
        Ok(mut file) => match serde_json::to_string(record) {
            Ok(json) => {
                if let Err(e) = writeln!(file, "{json}") {
                    error!("Failed to write history record: {e}");
                } else {
                    debug!("Saved session record to {}", path.display());
                }
            }
            Err(e) => error!("Failed to serialize record: {e}"),
        },
        Err(e) => error!("Failed to open history file: {e}"),
    }
}

/// Load all session records for a date (`YYYY-MM-DD` or `today`).
pub fn load_records(dir: &Path, date: &str) -> Vec<SessionRecord> {
    let path = history_file(dir, date);
    let file = match fs::File::open(&path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(e) => {
            error!("Failed to load history records: {e}");
            return Vec::new();
        }
    };

    std::io::BufReader::new(file)
        .lines()
        .map_while(Result::ok)
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<SessionRecord>(line.trim()) {
            Ok(record) => Some(record),
            Err(e) => {
                debug!("Skipping malformed history line: {e}");
                None
            }
        })
        .collect()
}

/// List all dates with history records (newest first).
pub fn list_available_dates(dir: &Path) -> Vec<String> {
    let mut dates: Vec<String> = fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|entry| {
            let name = entry.ok()?.file_name().to_string_lossy().to_string();
            name.strip_suffix(".jsonl").map(str::to_string)
        })
        .collect();

    dates.sort_by(|a, b| b.cmp(a));
    dates
}

fn format_duration(seconds: f64) -> String {
    if seconds < 60.0 {
        format!("{seconds:.1}s")
    } else {
        let minutes = (seconds / 60.0) as u64;
        let secs = seconds % 60.0;
        if minutes < 60 {
            format!("{minutes}m {secs:.0}s")
        } else {
            format!("{}h {}m", minutes / 60, minutes % 60)
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Generate a Markdown reading report for a date.
pub fn generate_report(dir: &Path, date: &str) -> String {
    let records = load_records(dir, date);

    let display_date = if date == "today" {
        Local::now().format("%Y-%m-%d").to_string()
    } else {
        date.to_string()
    };

    if records.is_empty() {
        return format!("# Reading Report - {display_date}\n\nNo reading sessions recorded.");
    }

    let total_words: usize = records.iter().map(|r| r.words_read).sum();
    let total_time: f64 = records.iter().map(|r| r.elapsed_s).sum();
    let finished = records.iter().filter(|r| r.finished).count();
    let avg_wpm = records.iter().map(|r| f64::from(r.wpm)).sum::<f64>() / records.len() as f64;

    let mut lines = vec![
        format!("# Reading Report - {display_date}"),
        String::new(),
        "## Summary".to_string(),
        format!("- **Sessions**: {}", records.len()),
        format!("- **Words read**: {total_words}"),
        format!("- **Reading time**: {}", format_duration(total_time)),
        format!("- **Average speed**: {avg_wpm:.0} wpm"),
        format!("- **Books finished**: {finished}"),
        String::new(),
        "## Session Log".to_string(),
        String::new(),
        "| Time | Book | Words | Position | Speed |".to_string(),
        "|------|------|-------|----------|-------|".to_string(),
    ];

    for r in &records {
        let position = if r.total_words == 0 {
            "-".to_string()
        } else {
            format!(
                "{:.0}%",
                (r.end_index + usize::from(r.finished)) as f64 / r.total_words as f64 * 100.0
            )
        };
        lines.push(format!(
            "| {} | {} | {} | {position} | {} wpm |",
            r.timestamp.format("%H:%M:%S"),
            truncate(&r.title, 30),
            r.words_read,
            r.wpm
        ));
    }

    lines.join("\n")
}
