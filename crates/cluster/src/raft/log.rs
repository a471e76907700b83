//! In-memory replicated log with a compacted prefix.
//!
//! Entries up to `snapshot_index` live only in the snapshot; `entries[0]`,
//! when present, has index `snapshot_index + 1`.

use serde::{Deserialize, Serialize};

use crate::command::Command;

use super::{LogIndex, Term};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub index: LogIndex,
    pub term: Term,
    pub command: Command,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaftLog {
    snapshot_index: LogIndex,
    snapshot_term: Term,
    entries: Vec<Entry>,
}

impl RaftLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(snapshot_index: LogIndex, snapshot_term: Term, entries: Vec<Entry>) -> Self {
        let entries = entries
            .into_iter()
            .filter(|e| e.index > snapshot_index)
            .collect();
        RaftLog {
            snapshot_index,
            snapshot_term,
            entries,
        }
    }

    pub fn snapshot_index(&self) -> LogIndex {
        self.snapshot_index
    }

    pub fn snapshot_term(&self) -> Term {
        self.snapshot_term
    }

    pub fn last_index(&self) -> LogIndex {
        self.entries
            .last()
            .map(|e| e.index)
            .unwrap_or(self.snapshot_index)
    }

    pub fn last_term(&self) -> Term {
        self.entries
            .last()
            .map(|e| e.term)
            .unwrap_or(self.snapshot_term)
    }

    /// Term of the entry at `index`. `None` when it was compacted away or
    /// does not exist yet.
    pub fn term_at(&self, index: LogIndex) -> Option<Term> {
        if index == self.snapshot_index {
            return Some(self.snapshot_term);
        }
        self.get(index).map(|e| e.term)
    }

    pub fn get(&self, index: LogIndex) -> Option<&Entry> {
        if index <= self.snapshot_index {
            return None;
        }
        self.entries.get((index - self.snapshot_index - 1) as usize)
    }

    /// Up to `max` entries starting at `from`.
    pub fn entries_from(&self, from: LogIndex, max: usize) -> Vec<Entry> {
        if from <= self.snapshot_index {
            return Vec::new();
        }
        let start = (from - self.snapshot_index - 1) as usize;
        self.entries.iter().skip(start).take(max).cloned().collect()
    }

    pub fn push(&mut self, term: Term, command: Command) -> Entry {
        let entry = Entry {
            index: self.last_index() + 1,
            term,
            command,
        };
        self.entries.push(entry.clone());
        entry
    }

    /// Drop every entry at or after `index`.
    pub fn truncate_from(&mut self, index: LogIndex) {
        if index <= self.snapshot_index {
            self.entries.clear();
            return;
        }
        let keep = (index - self.snapshot_index - 1) as usize;
        self.entries.truncate(keep);
    }

    /// Merge entries received from a leader. Returns the index of the first
    /// entry that had to be truncated (if any) and the entries actually
    /// appended.
    pub fn merge(&mut self, incoming: Vec<Entry>) -> (Option<LogIndex>, Vec<Entry>) {
        let mut truncated = None;
        let mut appended = Vec::new();
        for entry in incoming {
            if entry.index <= self.snapshot_index {
                continue;
            }
            match self.term_at(entry.index) {
                Some(term) if term == entry.term => continue,
                Some(_) => {
                    self.truncate_from(entry.index);
                    truncated.get_or_insert(entry.index);
                }
                None => {}
            }
            if entry.index == self.last_index() + 1 {
                self.entries.push(entry.clone());
                appended.push(entry);
            }
        }
        (truncated, appended)
    }

    /// Forget entries through `index`, which becomes the snapshot position.
    pub fn compact(&mut self, index: LogIndex, term: Term) {
        if index <= self.snapshot_index {
            return;
        }
        let drop = ((index - self.snapshot_index) as usize).min(self.entries.len());
        self.entries.drain(..drop);
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Discard everything and start over from a received snapshot.
    pub fn reset(&mut self, index: LogIndex, term: Term) {
        self.entries.clear();
        self.snapshot_index = index;
        self.snapshot_term = term;
    }

    /// Whether a log ending at (`last_index`, `last_term`) is at least as up
    /// to date as this one.
    pub fn is_up_to_date(&self, last_index: LogIndex, last_term: Term) -> bool {
        (last_term, last_index) >= (self.last_term(), self.last_index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(terms: &[Term]) -> RaftLog {
        let mut log = RaftLog::new();
        for t in terms {
            log.push(*t, Command::Noop);
        }
        log
    }

    fn entry(index: LogIndex, term: Term) -> Entry {
        Entry {
            index,
            term,
            command: Command::Noop,
        }
    }

    #[test]
    fn indexes_survive_compaction() {
        let mut log = filled(&[1, 1, 2, 2, 3]);
        log.compact(3, 2);
        assert_eq!(log.snapshot_index(), 3);
        assert_eq!(log.last_index(), 5);
        assert_eq!(log.term_at(3), Some(2));
        assert_eq!(log.term_at(2), None);
        assert_eq!(log.get(4).map(|e| e.term), Some(2));
        assert!(log.entries_from(2, 10).is_empty());
        assert_eq!(log.entries_from(4, 10).len(), 2);
    }

    #[test]
    fn merge_truncates_conflicting_suffix() {
        let mut log = filled(&[1, 1, 2]);
        let (truncated, appended) = log.merge(vec![entry(3, 3), entry(4, 3)]);
        assert_eq!(truncated, Some(3));
        assert_eq!(appended.len(), 2);
        assert_eq!(log.last_term(), 3);
        assert_eq!(log.last_index(), 4);
    }

    #[test]
    fn merge_of_known_entries_is_a_no_op() {
        let mut log = filled(&[1, 1]);
        let (truncated, appended) = log.merge(vec![entry(1, 1), entry(2, 1)]);
        assert_eq!(truncated, None);
        assert!(appended.is_empty());
        assert_eq!(log.last_index(), 2);
    }

    #[test]
    fn up_to_date_compares_term_before_index() {
        let log = filled(&[1, 2]);
        assert!(log.is_up_to_date(1, 3));
        assert!(!log.is_up_to_date(5, 1));
        assert!(log.is_up_to_date(2, 2));
    }
}
