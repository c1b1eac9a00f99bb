//! Readers for the prompt table and the shared system instruction.

use crate::error::{Error, Result};
use std::{fs, path::Path};
use tracing::{debug, trace};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Reads a comma-delimited file into rows of string fields.
///
/// There is no header row; every record is data. Records may have
/// different field counts. Every blank line becomes an empty row, so
/// callers can tell how many lines carried no prompt.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the file does not exist and
/// [`Error::Parse`] if the content is not valid delimited text.
pub fn read_rows(path: impl AsRef<Path>) -> Result<Vec<Vec<String>>> {
    let path = path.as_ref();
    debug!("Reading rows from {}", path.display());

    let bytes = fs::read(path).map_err(|e| Error::io(path, e))?;
    let content = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes[..]);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content);

    let mut rows = Vec::new();
    let mut record = csv::StringRecord::new();
    // Terminator bytes seen since the end of the last record's content.
    let mut gap = Vec::new();
    let mut after_record = false;

    loop {
        let start = byte_offset(&reader, content.len());
        let more = reader
            .read_record(&mut record)
            .map_err(|e| Error::parse(path, e.to_string()))?;
        let consumed = &content[start..byte_offset(&reader, content.len())];

        if !more {
            gap.extend_from_slice(consumed);
            push_blank_rows(&mut rows, &gap, after_record);
            break;
        }

        gap.extend_from_slice(leading_terminators(consumed));
        push_blank_rows(&mut rows, &gap, after_record);

        trace!("Row {}: {} field(s)", rows.len() + 1, record.len());
        rows.push(record.iter().map(str::to_owned).collect());

        gap.clear();
        gap.extend_from_slice(trailing_terminators(consumed));
        after_record = true;
    }

    debug!("Read {} rows from {}", rows.len(), path.display());
    Ok(rows)
}

fn byte_offset<R: std::io::Read>(reader: &csv::Reader<R>, len: usize) -> usize {
    usize::try_from(reader.position().byte()).map_or(len, |b| b.min(len))
}

const fn is_terminator(b: u8) -> bool {
    b == b'\r' || b == b'\n'
}

fn leading_terminators(bytes: &[u8]) -> &[u8] {
    let n = bytes.iter().take_while(|b| is_terminator(**b)).count();
    &bytes[..n]
}

fn trailing_terminators(bytes: &[u8]) -> &[u8] {
    let n = bytes.iter().rev().take_while(|b| is_terminator(**b)).count();
    &bytes[bytes.len() - n..]
}

/// Counts line breaks in a run of terminator bytes. CRLF, LF and a lone CR
/// each end one line.
fn count_line_breaks(run: &[u8]) -> usize {
    let mut count = 0;
    let mut i = 0;
    while i < run.len() {
        if run[i] == b'\r' && run.get(i + 1) == Some(&b'\n') {
            i += 1;
        }
        count += 1;
        i += 1;
    }
    count
}

/// Adds one empty row per blank line in `gap`. After a record, the first
/// line break is that record's own terminator.
fn push_blank_rows(rows: &mut Vec<Vec<String>>, gap: &[u8], after_record: bool) {
    let breaks = count_line_breaks(gap);
    let blank = if after_record {
        breaks.saturating_sub(1)
    } else {
        breaks
    };
    if blank > 0 {
        trace!("{blank} blank line(s) before row {}", rows.len() + blank + 1);
    }
    rows.extend(std::iter::repeat_with(Vec::new).take(blank));
}

/// Takes the first field of every row that has one, keeping row order.
#[must_use]
pub fn prompts_from_rows(rows: &[Vec<String>]) -> Vec<String> {
    rows.iter()
        .filter_map(|row| row.first().cloned())
        .collect()
}

/// Reads the prompt table and extracts one prompt per non-empty row.
///
/// # Errors
///
/// See [`read_rows`].
pub fn read_prompts(path: impl AsRef<Path>) -> Result<Vec<String>> {
    read_rows(path).map(|rows| prompts_from_rows(&rows))
}

/// Loads the system instruction verbatim.
///
/// # Errors
///
/// Returns [`Error::NotFound`] if the file does not exist, or
/// [`Error::Io`] if it cannot be read as UTF-8 text.
pub fn load_instruction(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let instruction = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    debug!(
        "Loaded instruction from {} ({} bytes)",
        path.display(),
        instruction.len()
    );
    Ok(instruction)
}
