use std::fs;
use std::path::Path;

use anyhow::Context;
use csv::{ReaderBuilder, StringRecord, Writer};
use tracing::info;

use crate::AppError;

/// Data rows after the header that keep their rank verbatim, even when the
/// values are duplicated, gapped, or not numbers. The top cut ranks come
/// from the unified placements and must not be renumbered.
pub const PROTECTED_PREFIX: usize = 8;

/// Renumbers the rank column so that, after the first `skip` data rows, it
/// counts up without gaps. Digit-valued cells are rewritten to the expected
/// sequence number; anything else is left alone but still advances the
/// sequence. With no `output`, the input file is replaced atomically via a
/// sibling temp file.
pub fn fix_sequence(input: &Path, output: Option<&Path>, skip: usize) -> Result<(), AppError> {
    let in_place = output.is_none();
    let mut temp_name = input.as_os_str().to_owned();
    temp_name.push(".tmp");
    let target = match output {
        Some(path) => path.to_path_buf(),
        None => temp_name.into(),
    };

    rewrite(input, &target, skip)?;

    if in_place {
        fs::rename(&target, input)
            .with_context(|| format!("failed to replace {}", input.display()))?;
        info!("renumbered {} in place", input.display());
    } else {
        info!("renumbered {} into {}", input.display(), target.display());
    }
    Ok(())
}

fn rewrite(input: &Path, output: &Path, skip: usize) -> Result<(), AppError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(input)
        .with_context(|| format!("failed to open {}", input.display()))?;
    let mut writer =
        Writer::from_path(output).with_context(|| format!("failed to create {}", output.display()))?;

    let mut records = reader.records();

    // Header row is copied unchanged.
    if let Some(header) = records.next() {
        writer.write_record(&header.context("malformed header row")?)?;
    }

    let mut expected: u64 = 1;
    for record in records {
        let mut record: StringRecord = record.context("malformed data row")?;
        if expected > skip as u64 {
            if let Some(value) = record.get(0) {
                if let Some(current) = parse_digits(value) {
                    if current != expected {
                        record = replace_first(&record, &expected.to_string());
                    }
                }
            }
        }
        // The sequence advances even for rows we leave untouched.
        expected += 1;
        writer.write_record(&record)?;
    }

    writer.flush()?;
    Ok(())
}

/// Only unsigned digit strings count; anything else (signs, blanks, text)
/// is not a rank we renumber.
fn parse_digits(value: &str) -> Option<u64> {
    if value.is_empty() || !value.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

fn replace_first(record: &StringRecord, value: &str) -> StringRecord {
    let mut cells: Vec<&str> = record.iter().collect();
    if !cells.is_empty() {
        cells[0] = value;
    }
    StringRecord::from(cells)
}
