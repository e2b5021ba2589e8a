//! Periodic task schedule: which jobs run, at what time of day, how often.

pub mod evaluator;

pub use evaluator::PeriodicEvaluator;

use std::path::Path;

use tracing::warn;

use crate::error::ScheduleError;

/// Static schedule mapping job names to raw `"HH:MM period"` entries, where
/// `period` is minutes between runs and `0` means once per day.
///
/// Entries stay raw strings here; the evaluator validates them so that one
/// bad entry cannot take the rest of the schedule down.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    entries: Vec<(String, String)>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry. A later entry for the same job replaces the earlier one.
    pub fn add(&mut self, method: impl Into<String>, line: impl Into<String>) {
        let method = method.into();
        let line = line.into();
        if let Some(existing) = self.entries.iter_mut().find(|(m, _)| *m == method) {
            existing.1 = line;
        } else {
            self.entries.push((method, line));
        }
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(m, l)| (m.as_str(), l.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Load a schedule from an INI-style file: `method = HH:MM period` lines,
    /// with `#`/`;` comments and `[section]` headers ignored.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ScheduleError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ScheduleError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&content))
    }

    /// Parse schedule text. Unusable lines are skipped with a warning.
    pub fn parse(content: &str) -> Self {
        let mut schedule = Schedule::new();
        for raw in content.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if line.starts_with('[') && line.ends_with(']') {
                continue;
            }
            match line.split_once('=') {
                Some((method, value)) => {
                    let method = method.trim();
                    let value = value.trim();
                    if method.is_empty() || value.is_empty() {
                        warn!(line = %raw, "Ignoring schedule line with an empty side");
                        continue;
                    }
                    schedule.add(method, value);
                }
                None => warn!(line = %raw, "Ignoring schedule line without '='"),
            }
        }
        schedule
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_entries_and_skips_noise() {
        let schedule = Schedule::parse(
            "# comment\n\
             [periodic]\n\
             jobs.tick = 09:00 10\n\
             ; another comment\n\
             \n\
             jobs.report = 18:30 0\n\
             not a schedule line\n\
             = 10:00 5\n",
        );
        assert_eq!(schedule.len(), 2);
        let entries: Vec<_> = schedule.entries().collect();
        assert!(entries.contains(&("jobs.tick", "09:00 10")));
        assert!(entries.contains(&("jobs.report", "18:30 0")));
    }

    #[test]
    fn later_entry_replaces_earlier() {
        let mut schedule = Schedule::new();
        schedule.add("jobs.tick", "09:00 10");
        schedule.add("jobs.tick", "10:00 5");
        assert_eq!(schedule.len(), 1);
        assert_eq!(schedule.entries().next(), Some(("jobs.tick", "10:00 5")));
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[periodic]").unwrap();
        writeln!(file, "jobs.tick = 09:00 10").unwrap();

        let schedule = Schedule::from_file(file.path()).unwrap();
        assert_eq!(schedule.len(), 1);
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = Schedule::from_file("/definitely/not/here.ini").unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here.ini"));
    }
}
