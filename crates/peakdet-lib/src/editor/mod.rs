//! Manual peak correction.
//!
//! An [`Editor`] owns a record for the duration of one review session. Every
//! mutation is appended to the record's history as an [`EditOp`] carrying
//! enough data to invert itself, so undo is a pop plus an inverse apply.

pub mod console;

use crate::error::{PhysioError, PhysioResult};
use crate::signal::PhysioRecord;
use serde::{Deserialize, Serialize};

/// One logged edit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum EditOp {
    AddPeak {
        index: usize,
    },
    DeletePeak {
        index: usize,
    },
    /// Active peaks in `[start, end)` moved to the rejected set.
    RejectRange {
        start: usize,
        end: usize,
        moved: Vec<usize>,
    },
    /// Rejected indices in `[start, end)` moved back to the active set.
    RestoreRange {
        start: usize,
        end: usize,
        moved: Vec<usize>,
    },
}

/// Active and rejected peak sets, both strictly increasing and disjoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PeakState {
    pub peaks: Vec<usize>,
    pub rejected: Vec<usize>,
}

impl PeakState {
    fn of(record: &PhysioRecord) -> Self {
        Self {
            peaks: record.peaks.clone(),
            rejected: record.rejected.clone(),
        }
    }
}

fn insert_sorted(set: &mut Vec<usize>, value: usize) {
    if let Err(pos) = set.binary_search(&value) {
        set.insert(pos, value);
    }
}

fn remove_sorted(set: &mut Vec<usize>, value: usize) {
    if let Ok(pos) = set.binary_search(&value) {
        set.remove(pos);
    }
}

fn move_all(from: &mut Vec<usize>, to: &mut Vec<usize>, values: &[usize]) {
    for &value in values {
        remove_sorted(from, value);
        insert_sorted(to, value);
    }
}

impl EditOp {
    pub fn apply(&self, state: &mut PeakState) {
        match self {
            EditOp::AddPeak { index } => insert_sorted(&mut state.peaks, *index),
            EditOp::DeletePeak { index } => remove_sorted(&mut state.peaks, *index),
            EditOp::RejectRange { moved, .. } => {
                move_all(&mut state.peaks, &mut state.rejected, moved)
            }
            EditOp::RestoreRange { moved, .. } => {
                move_all(&mut state.rejected, &mut state.peaks, moved)
            }
        }
    }

    pub fn invert(&self, state: &mut PeakState) {
        match self {
            EditOp::AddPeak { index } => remove_sorted(&mut state.peaks, *index),
            EditOp::DeletePeak { index } => insert_sorted(&mut state.peaks, *index),
            EditOp::RejectRange { moved, .. } => {
                move_all(&mut state.rejected, &mut state.peaks, moved)
            }
            EditOp::RestoreRange { moved, .. } => {
                move_all(&mut state.peaks, &mut state.rejected, moved)
            }
        }
    }
}

/// Rebuild the peak sets by replaying `history` on top of a detection result.
pub fn replay(detected: &[usize], history: &[EditOp]) -> PeakState {
    let mut state = PeakState {
        peaks: detected.to_vec(),
        rejected: Vec::new(),
    };
    for op in history {
        op.apply(&mut state);
    }
    state
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditorState {
    Reviewing,
    Committed,
    Discarded,
}

/// Result of a finished review session.
#[derive(Debug)]
pub enum EditOutcome {
    Committed(PhysioRecord),
    /// Peaks rolled back to the state the session was opened with.
    Discarded(PhysioRecord),
}

pub struct Editor {
    record: PhysioRecord,
    entry: PeakState,
    session_start: usize,
    tolerance: usize,
    state: EditorState,
}

impl Editor {
    pub fn open(record: PhysioRecord) -> Self {
        let tolerance = (0.02 * record.fs()).round().max(1.0) as usize;
        Self {
            entry: PeakState::of(&record),
            session_start: record.history.len(),
            record,
            tolerance,
            state: EditorState::Reviewing,
        }
    }

    /// Half-width (samples) of the window in which added peaks must be extrema.
    pub fn with_tolerance(mut self, tolerance: usize) -> Self {
        self.tolerance = tolerance;
        self
    }

    pub fn state(&self) -> EditorState {
        self.state
    }
    pub fn record(&self) -> &PhysioRecord {
        &self.record
    }
    pub fn peaks(&self) -> &[usize] {
        self.record.peaks()
    }
    pub fn rejected(&self) -> &[usize] {
        self.record.rejected()
    }
    pub fn tolerance(&self) -> usize {
        self.tolerance
    }

    /// Edits made since the session was opened.
    pub fn session_ops(&self) -> &[EditOp] {
        &self.record.history[self.session_start..]
    }

    fn ensure_open(&self) -> PhysioResult<()> {
        match self.state {
            EditorState::Reviewing => Ok(()),
            _ => Err(PhysioError::SessionClosed),
        }
    }

    fn push(&mut self, op: EditOp) {
        let mut state = PeakState::of(&self.record);
        op.apply(&mut state);
        self.record.peaks = state.peaks;
        self.record.rejected = state.rejected;
        self.record.history.push(op);
    }

    fn is_local_extremum(&self, index: usize) -> bool {
        let data = self.record.samples();
        let lo = index.saturating_sub(self.tolerance);
        let hi = (index + self.tolerance).min(data.len() - 1);
        let value = data[index];
        let window = &data[lo..=hi];
        if window.iter().all(|&x| x == value) {
            return false;
        }
        window.iter().all(|&x| x <= value) || window.iter().all(|&x| x >= value)
    }

    pub fn add_peak(&mut self, index: usize) -> PhysioResult<()> {
        self.ensure_open()?;
        let n = self.record.len();
        if index >= n {
            return Err(PhysioError::invalid_index(
                index,
                format!("outside record of {n} samples"),
            ));
        }
        if self.record.peaks.binary_search(&index).is_ok() {
            return Err(PhysioError::invalid_index(index, "already a peak"));
        }
        if self.record.rejected.binary_search(&index).is_ok() {
            return Err(PhysioError::invalid_index(
                index,
                "index is rejected; restore it instead",
            ));
        }
        if !self.is_local_extremum(index) {
            return Err(PhysioError::invalid_index(
                index,
                format!("not a local extremum within +/-{} samples", self.tolerance),
            ));
        }
        self.push(EditOp::AddPeak { index });
        Ok(())
    }

    pub fn delete_peak(&mut self, index: usize) -> PhysioResult<()> {
        self.ensure_open()?;
        if self.record.peaks.binary_search(&index).is_err() {
            return Err(PhysioError::NotFound(index));
        }
        self.push(EditOp::DeletePeak { index });
        Ok(())
    }

    fn check_range(&self, start: usize, end: usize) -> PhysioResult<()> {
        if start >= end {
            return Err(PhysioError::invalid_index(
                start,
                format!("empty range [{start}, {end})"),
            ));
        }
        if start >= self.record.len() {
            return Err(PhysioError::invalid_index(
                start,
                format!("outside record of {} samples", self.record.len()),
            ));
        }
        Ok(())
    }

    /// Reject every active peak in `[start, end)`; returns how many moved.
    pub fn reject_range(&mut self, start: usize, end: usize) -> PhysioResult<usize> {
        self.ensure_open()?;
        self.check_range(start, end)?;
        let moved: Vec<usize> = self
            .record
            .peaks
            .iter()
            .copied()
            .filter(|p| (start..end).contains(p))
            .collect();
        let count = moved.len();
        self.push(EditOp::RejectRange { start, end, moved });
        Ok(count)
    }

    /// Un-reject every rejected index in `[start, end)`; returns how many moved.
    pub fn restore_range(&mut self, start: usize, end: usize) -> PhysioResult<usize> {
        self.ensure_open()?;
        self.check_range(start, end)?;
        let moved: Vec<usize> = self
            .record
            .rejected
            .iter()
            .copied()
            .filter(|p| (start..end).contains(p))
            .collect();
        let count = moved.len();
        self.push(EditOp::RestoreRange { start, end, moved });
        Ok(count)
    }

    /// Revert the most recent edit of this session.
    pub fn undo(&mut self) -> PhysioResult<EditOp> {
        self.ensure_open()?;
        if self.record.history.len() <= self.session_start {
            return Err(PhysioError::NothingToUndo);
        }
        let op = self
            .record
            .history
            .pop()
            .ok_or(PhysioError::NothingToUndo)?;
        let mut state = PeakState::of(&self.record);
        op.invert(&mut state);
        self.record.peaks = state.peaks;
        self.record.rejected = state.rejected;
        Ok(op)
    }

    /// Index of the largest sample within `+/-window` of `index`.
    pub fn nearest_extremum(&self, index: usize, window: usize) -> Option<usize> {
        let data = self.record.samples();
        if index >= data.len() {
            return None;
        }
        let lo = index.saturating_sub(window);
        let hi = (index + window).min(data.len() - 1);
        (lo..=hi).max_by(|&a, &b| {
            data[a]
                .total_cmp(&data[b])
                .then(b.abs_diff(index).cmp(&a.abs_diff(index)))
                .then(b.cmp(&a))
        })
    }

    pub fn commit(&mut self) -> PhysioResult<()> {
        self.ensure_open()?;
        self.state = EditorState::Committed;
        Ok(())
    }

    pub fn discard(&mut self) -> PhysioResult<()> {
        self.ensure_open()?;
        self.roll_back();
        Ok(())
    }

    fn roll_back(&mut self) {
        self.record.history.truncate(self.session_start);
        self.record.peaks = self.entry.peaks.clone();
        self.record.rejected = self.entry.rejected.clone();
        self.state = EditorState::Discarded;
    }

    /// Close the session. A session still under review is discarded.
    pub fn finish(mut self) -> EditOutcome {
        if self.state == EditorState::Reviewing {
            log::warn!("review ended without commit; discarding session edits");
            self.roll_back();
        }
        match self.state {
            EditorState::Committed => EditOutcome::Committed(self.record),
            _ => EditOutcome::Discarded(self.record),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    /// Alternating bumps so every odd index is a local maximum.
    fn record() -> PhysioRecord {
        let data: Vec<f64> = (0..40).map(|i| if i % 4 == 1 { 1.0 } else { 0.0 }).collect();
        let mut record = PhysioRecord::new(data, 10.0).unwrap();
        record.peaks = vec![1, 9, 17, 25];
        record.detected = record.peaks.clone();
        record
    }

    #[test]
    fn add_requires_local_extremum() {
        let mut editor = Editor::open(record()).with_tolerance(1);
        assert!(matches!(
            editor.add_peak(3),
            Err(PhysioError::InvalidIndex { .. })
        ));
        editor.add_peak(5).unwrap();
        assert_eq!(editor.peaks(), &[1, 5, 9, 17, 25]);
        assert!(editor.add_peak(5).is_err());
        assert!(editor.add_peak(400).is_err());
    }

    #[test]
    fn delete_missing_peak_is_not_found() {
        let mut editor = Editor::open(record());
        assert!(matches!(editor.delete_peak(2), Err(PhysioError::NotFound(2))));
        editor.delete_peak(9).unwrap();
        assert_eq!(editor.peaks(), &[1, 17, 25]);
    }

    #[test]
    fn reject_moves_peaks_out_of_active_set() {
        let mut editor = Editor::open(record());
        assert_eq!(editor.reject_range(5, 18).unwrap(), 2);
        assert_eq!(editor.peaks(), &[1, 25]);
        assert_eq!(editor.rejected(), &[9, 17]);
        assert!(editor.add_peak(9).is_err());
        assert_eq!(editor.restore_range(0, 10).unwrap(), 1);
        assert_eq!(editor.peaks(), &[1, 9, 25]);
        assert_eq!(editor.rejected(), &[17]);
        assert!(editor.reject_range(10, 10).is_err());
    }

    #[test]
    fn undo_walks_back_to_session_start() {
        let mut editor = Editor::open(record());
        editor.delete_peak(1).unwrap();
        editor.reject_range(0, 20).unwrap();
        editor.undo().unwrap();
        assert_eq!(editor.peaks(), &[9, 17, 25]);
        editor.undo().unwrap();
        assert_eq!(editor.peaks(), &[1, 9, 17, 25]);
        assert!(matches!(editor.undo(), Err(PhysioError::NothingToUndo)));
    }

    #[test]
    fn undo_stops_at_previous_session() {
        let mut editor = Editor::open(record());
        editor.delete_peak(1).unwrap();
        editor.commit().unwrap();
        let EditOutcome::Committed(first) = editor.finish() else {
            panic!("expected commit");
        };
        let mut editor = Editor::open(first);
        assert!(matches!(editor.undo(), Err(PhysioError::NothingToUndo)));
        assert_eq!(editor.record().history().len(), 1);
    }

    #[test]
    fn discard_restores_entry_state() {
        let mut editor = Editor::open(record());
        editor.delete_peak(9).unwrap();
        editor.reject_range(20, 30).unwrap();
        editor.discard().unwrap();
        assert_eq!(editor.state(), EditorState::Discarded);
        assert!(matches!(editor.add_peak(5), Err(PhysioError::SessionClosed)));
        let EditOutcome::Discarded(rec) = editor.finish() else {
            panic!("expected discard");
        };
        assert_eq!(rec.peaks(), &[1, 9, 17, 25]);
        assert!(rec.rejected().is_empty());
        assert!(rec.history().is_empty());
    }

    #[test]
    fn unfinished_session_is_discarded() {
        let mut editor = Editor::open(record());
        editor.delete_peak(17).unwrap();
        editor.reject_range(0, 5).unwrap();
        let EditOutcome::Discarded(rec) = editor.finish() else {
            panic!("expected discard");
        };
        assert_eq!(rec.peaks(), &[1, 9, 17, 25]);
        assert!(rec.rejected().is_empty());
        assert!(rec.history().is_empty());
    }

    #[test]
    fn nearest_extremum_snaps_to_maximum() {
        let editor = Editor::open(record());
        assert_eq!(editor.nearest_extremum(4, 2), Some(5));
        assert_eq!(editor.nearest_extremum(3, 2), Some(1));
        assert_eq!(editor.nearest_extremum(100, 2), None);
    }

    #[test]
    fn random_edit_sequences_undo_to_origin() {
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..100 {
            let mut editor = Editor::open(record()).with_tolerance(1);
            let origin = (editor.peaks().to_vec(), editor.rejected().to_vec());
            let mut applied = 0;
            for _ in 0..rng.gen_range(1..30) {
                let a = rng.gen_range(0..40);
                let b = rng.gen_range(0..40);
                let ok = match rng.gen_range(0..4) {
                    0 => editor.add_peak(a).is_ok(),
                    1 => editor.delete_peak(a).is_ok(),
                    2 => editor.reject_range(a.min(b), a.max(b) + 1).is_ok(),
                    _ => editor.restore_range(a.min(b), a.max(b) + 1).is_ok(),
                };
                if ok {
                    applied += 1;
                }
                let rec = editor.record();
                assert!(rec.validate().is_ok());
                let replayed = replay(rec.detected(), rec.history());
                assert_eq!(replayed.peaks, rec.peaks());
                assert_eq!(replayed.rejected, rec.rejected());
            }
            for _ in 0..applied {
                editor.undo().unwrap();
            }
            assert_eq!(
                (editor.peaks().to_vec(), editor.rejected().to_vec()),
                origin
            );
        }
    }
}
