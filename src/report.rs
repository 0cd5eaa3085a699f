//! Recognition statistics over audit records.

use serde::Serialize;
use std::collections::HashMap;

use crate::audit::{LogRecord, RecognitionStatus};

/// Number of `Recognized` records for one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecognitionCount {
    pub name: String,
    pub count: u64,
}

/// Count `Recognized` records per name, most frequent first.
///
/// Ties are ordered by name so output is stable.
pub fn recognition_counts(records: &[LogRecord]) -> Vec<RecognitionCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for record in records {
        if record.status == RecognitionStatus::Recognized {
            *counts.entry(record.name.as_str()).or_default() += 1;
        }
    }
    let mut out: Vec<RecognitionCount> = counts
        .into_iter()
        .map(|(name, count)| RecognitionCount {
            name: name.to_string(),
            count,
        })
        .collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
    out
}

/// Render counts as a fixed-width text table with proportional bars.
pub fn render_table(counts: &[RecognitionCount]) -> String {
    const BAR_WIDTH: u64 = 40;
    let name_width = counts
        .iter()
        .map(|c| c.name.chars().count())
        .max()
        .unwrap_or(0)
        .max("Name".len());
    let max = counts.iter().map(|c| c.count).max().unwrap_or(0);

    let mut out = format!("{:<width$}  {:>6}\n", "Name", "Count", width = name_width);
    for c in counts {
        let bar = if max == 0 {
            0
        } else {
            ((c.count * BAR_WIDTH) + max - 1) / max
        };
        out.push_str(&format!(
            "{:<width$}  {:>6}  {}\n",
            c.name,
            c.count,
            "#".repeat(bar as usize),
            width = name_width
        ));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, status: RecognitionStatus) -> LogRecord {
        LogRecord {
            timestamp: "2024-05-01 12:00:00".to_string(),
            name: name.to_string(),
            status,
        }
    }

    #[test]
    fn counts_only_recognized_and_sorts_descending() {
        let records = vec![
            record("bob", RecognitionStatus::Recognized),
            record("alice", RecognitionStatus::Recognized),
            record("Not Recognized", RecognitionStatus::NotRecognized),
            record("alice", RecognitionStatus::Recognized),
        ];
        let counts = recognition_counts(&records);
        assert_eq!(
            counts,
            vec![
                RecognitionCount {
                    name: "alice".to_string(),
                    count: 2
                },
                RecognitionCount {
                    name: "bob".to_string(),
                    count: 1
                },
            ]
        );
    }

    #[test]
    fn empty_input_gives_header_only() {
        let table = render_table(&recognition_counts(&[]));
        assert_eq!(table.lines().count(), 1);
    }

    #[test]
    fn table_scales_bars_to_the_largest_count() {
        let table = render_table(&[
            RecognitionCount {
                name: "alice".to_string(),
                count: 4,
            },
            RecognitionCount {
                name: "bob".to_string(),
                count: 1,
            },
        ]);
        let lines: Vec<&str> = table.lines().collect();
        assert!(lines[1].ends_with(&"#".repeat(40)));
        assert!(lines[2].ends_with(&"#".repeat(10)));
    }
}
