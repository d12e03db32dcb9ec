use std::fs::read_to_string;
use std::path::Path;

use chrono::NaiveDateTime;
use miette::{miette, Context, IntoDiagnostic, Result};
use thiserror::Error;

const LOG_TIMESTAMP_FORMATS: [&str; 2] = ["%Y-%m-%d %H:%M:%S%.f", "%Y/%m/%d %H:%M:%S%.f"];

#[derive(Error, Debug, PartialEq, Eq)]
pub enum IdLogError {
    #[error("Line {line_number} has no date, time and id: {line:?}")]
    MalformedLine { line_number: usize, line: String },

    #[error("Line {line_number} has an unparseable timestamp: {timestamp:?}")]
    InvalidTimestamp {
        line_number: usize,
        timestamp: String,
    },
}


/// A `[offset, offset + size)` slice of the item ID list, with `offset = page * size`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct WorkWindow {
    pub page: usize,
    pub size: usize,
}

impl WorkWindow {
    pub fn new(page: usize, size: usize) -> Self {
        Self { page, size }
    }

    pub fn offset(&self) -> usize {
        self.page.saturating_mul(self.size)
    }

    pub fn apply<'a>(&self, ids: &'a [String]) -> &'a [String] {
        let start = self.offset().min(ids.len());
        let end = start.saturating_add(self.size).min(ids.len());

        &ids[start..end]
    }
}


/// Loads the pre-sorted JSON array of item IDs.
pub fn load_item_ids<P: AsRef<Path>>(path: P) -> Result<Vec<String>> {
    let path = path.as_ref();

    if !path.is_file() {
        return Err(miette!(
            "Item ID list does not exist or is not a file: {:?}",
            path
        ));
    }

    let file_contents = read_to_string(path)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Could not read item ID list."))?;

    serde_json::from_str(&file_contents)
        .into_diagnostic()
        .wrap_err_with(|| miette!("Item ID list is not a JSON array of strings."))
}

/// Turns a log of `<date> <time> ... <id>` lines into a list of IDs sorted by timestamp.
///
/// Blank lines are ignored. Lines with equal timestamps keep their original order.
pub fn parse_log_into_sorted_ids(log_contents: &str) -> Result<Vec<String>, IdLogError> {
    let mut entries: Vec<(NaiveDateTime, String)> = Vec::new();

    for (line_index, line) in log_contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }

        let line_number = line_index + 1;
        let tokens: Vec<&str> = line.split_whitespace().collect();

        let (date, time, id) = match tokens.as_slice() {
            [date, time, .., id] => (*date, *time, *id),
            _ => {
                return Err(IdLogError::MalformedLine {
                    line_number,
                    line: line.to_string(),
                });
            }
        };

        let timestamp_string = format!("{} {}", date, time);
        let timestamp = parse_log_timestamp(&timestamp_string).ok_or_else(|| {
            IdLogError::InvalidTimestamp {
                line_number,
                timestamp: timestamp_string.clone(),
            }
        })?;

        entries.push((timestamp, id.to_string()));
    }

    entries.sort_by_key(|(timestamp, _)| *timestamp);

    Ok(entries.into_iter().map(|(_, id)| id).collect())
}

fn parse_log_timestamp(timestamp: &str) -> Option<NaiveDateTime> {
    LOG_TIMESTAMP_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(timestamp, format).ok())
        .or_else(|| {
            // ISO timestamps in the first column ("2019-03-20T12:00:00 INFO ...").
            let (date_time, _) = timestamp.split_once(' ')?;
            NaiveDateTime::parse_from_str(date_time, "%Y-%m-%dT%H:%M:%S%.f").ok()
        })
}
