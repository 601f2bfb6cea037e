//! `ls` output formatting.

use byte_unit::{Byte, UnitType};

use crate::types::ListEntry;

/// Format one listing line.
///
/// Prefixes render as a right-aligned `DIR` marker; objects render their
/// size in a 10-character column, an optional last-modified timestamp,
/// and the full key.
pub fn format_entry(entry: &ListEntry, human_readable: bool, with_date: bool) -> String {
    if entry.is_prefix {
        return format!("{:>10} {}", "DIR", entry.full_key());
    }

    let size = if human_readable {
        format!("{:>10}", human_size(entry.size))
    } else {
        format!("{:>10}", entry.size)
    };

    let date = if with_date {
        entry
            .last_modified
            .map(|t| format!(" {}", t.format("%Y-%m-%dT%H:%M:%S")))
            .unwrap_or_default()
    } else {
        String::new()
    };

    format!("{}{} {}", size, date, entry.full_key())
}

/// Decimal-suffixed size, e.g. `1.2 MB`.
fn human_size(size: u64) -> String {
    let adjusted = Byte::from_u64(size).get_appropriate_unit(UnitType::Decimal);
    format!("{adjusted:.1}")
}
