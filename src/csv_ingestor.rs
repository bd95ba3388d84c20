//! Roster ingestion: turns an uploaded CSV export into client records.
//!
//! The parser is deliberately naive. It splits on the delimiter without
//! honouring quoted delimiters, strips one layer of surrounding quotes per
//! field, and drops rows that do not line up with the header. Dropped rows
//! are reported in [`IngestReport::skipped`] instead of disappearing silently.

use crate::models::{ClientRecord, IngestReport, SkipReason, SkippedRow};

/// Parses roster text into client records, discarding unusable rows.
///
/// An empty result means the upload had no valid data; callers surface that
/// to the user instead of treating it as an error.
pub fn parse_csv(text: &str) -> Vec<ClientRecord> {
    ingest_csv(text).records
}

/// Parses roster text and keeps track of every row that was dropped.
pub fn ingest_csv(text: &str) -> IngestReport {
    // Spreadsheet exports often start with a UTF-8 BOM
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    // Keep the physical line number so diagnostics point at the source file
    let lines: Vec<(usize, &str)> = split_lines(text)
        .enumerate()
        .map(|(index, line)| (index + 1, line))
        .filter(|(_, line)| !line.trim().is_empty())
        .collect();

    if lines.len() < 2 {
        tracing::debug!("Roster has {} non-blank lines, nothing to ingest", lines.len());
        return IngestReport::default();
    }

    let delimiter = detect_delimiter(lines[0].1);
    let headers = split_fields(lines[0].1, delimiter);

    let mut report = IngestReport {
        records: Vec::with_capacity(lines.len() - 1),
        skipped: Vec::new(),
        delimiter: Some(delimiter),
    };

    for &(line_number, line) in lines.iter().skip(1) {
        let values = split_fields(line, delimiter);

        if values.len() != headers.len() {
            report.skipped.push(SkippedRow {
                line: line_number,
                reason: SkipReason::FieldCountMismatch {
                    expected: headers.len(),
                    found: values.len(),
                },
            });
            continue;
        }

        match ClientRecord::from_pairs(headers.iter().cloned().zip(values)) {
            Some(record) => report.records.push(record),
            None => report.skipped.push(SkippedRow {
                line: line_number,
                reason: SkipReason::MissingClientId,
            }),
        }
    }

    if !report.skipped.is_empty() {
        tracing::warn!(
            "Roster ingestion dropped {} of {} data rows",
            report.skipped.len(),
            lines.len() - 1
        );
    }
    tracing::info!(
        "Roster ingested: {} clients (delimiter '{}')",
        report.records.len(),
        delimiter
    );

    report
}

/// Semicolon when the header contains one, comma otherwise.
pub fn detect_delimiter(header: &str) -> char {
    if header.contains(';') {
        ';'
    } else {
        ','
    }
}

/// Splits on `\n`, dropping the `\r` of `\r\n` endings.
fn split_lines(text: &str) -> impl Iterator<Item = &str> {
    text.split('\n')
        .map(|line| line.strip_suffix('\r').unwrap_or(line))
}

fn split_fields(line: &str, delimiter: char) -> Vec<String> {
    line.split(delimiter).map(clean_field).collect()
}

/// Trims whitespace, then removes one leading and one trailing double quote.
fn clean_field(raw: &str) -> String {
    let trimmed = raw.trim();
    let trimmed = trimmed.strip_prefix('"').unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix('"').unwrap_or(trimmed);
    trimmed.to_string()
}
