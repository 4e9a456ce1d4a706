use std::collections::HashMap;

/// Quiet period after a commit before the staged value is written. A
/// re-commit to the same cell inside the window replaces the value and
/// restarts the window, so a typing burst costs one write.
pub const EDIT_DEBOUNCE_MS: u64 = 400;

/// Strict mark parsing: `null` is an absence, whole numbers in 0..=100 are
/// marks, everything else is rejected as typed. Out-of-range input is never
/// clamped into range.
pub fn parse_mark_value(raw: &serde_json::Value) -> Result<Option<u32>, String> {
    if raw.is_null() {
        return Ok(None);
    }
    let Some(n) = raw.as_f64() else {
        return Err("mark must be a number or null".to_string());
    };
    if !n.is_finite() {
        return Err("mark must be a finite number".to_string());
    }
    if n.fract() != 0.0 {
        return Err("mark must be a whole number".to_string());
    }
    if !(0.0..=100.0).contains(&n) {
        return Err("mark must be between 0 and 100".to_string());
    }
    Ok(Some(n as u32))
}

/// One cell of one class/exam grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellKey {
    pub class_id: String,
    pub exam_id: String,
    pub student_id: String,
    pub subject: String,
}

/// Rest/progress states of a cell. A cell passes through validation inside
/// `commit` and settles in `Clean` (nothing staged) or `Editing` (staged,
/// waiting out the quiet period); `Saving` only exists between `begin_save`
/// and `finish_save` during a flush. A started write always runs to
/// completion, there is no cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellState {
    Clean,
    Editing,
    Saving,
}

#[derive(Debug, Clone)]
struct CellEditor {
    /// Last known-good value; what a rejection or failed write restores.
    committed: Option<u32>,
    state: CellState,
    staged: Option<u32>,
    deadline_ms: u64,
}

impl CellEditor {
    fn new(committed: Option<u32>) -> Self {
        CellEditor {
            committed,
            state: CellState::Clean,
            staged: None,
            deadline_ms: 0,
        }
    }

    fn stage(&mut self, value: Option<u32>, now_ms: u64) {
        self.state = CellState::Editing;
        self.staged = value;
        self.deadline_ms = now_ms + EDIT_DEBOUNCE_MS;
    }

    fn is_due(&self, now_ms: u64) -> bool {
        self.state == CellState::Editing && now_ms >= self.deadline_ms
    }
}

/// Outcome of committing a typed value to a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Valid input, staged behind the quiet period.
    Staged {
        value: Option<u32>,
        deadline_ms: u64,
    },
    /// Invalid input. Any staged edit for the cell is dropped and the cell
    /// reverts to `restored`.
    Rejected {
        reason: String,
        restored: Option<u32>,
    },
}

/// All staged edits, one editor per touched cell. Cells debounce
/// independently of each other.
#[derive(Debug, Default)]
pub struct EditQueue {
    cells: HashMap<CellKey, CellEditor>,
}

impl EditQueue {
    pub fn new() -> Self {
        EditQueue {
            cells: HashMap::new(),
        }
    }

    /// Validate-and-stage. `stored` is the cell's current store value, used
    /// as the known-good baseline the first time a cell is touched; a cell
    /// edited twice keeps the baseline it was opened with, because the
    /// intermediate value was coalesced away and never written.
    pub fn commit(
        &mut self,
        key: CellKey,
        stored: Option<u32>,
        raw: &serde_json::Value,
        now_ms: u64,
    ) -> CommitOutcome {
        let baseline = self
            .cells
            .get(&key)
            .map(|c| c.committed)
            .unwrap_or(stored);
        match parse_mark_value(raw) {
            Err(reason) => {
                self.cells.remove(&key);
                CommitOutcome::Rejected {
                    reason,
                    restored: baseline,
                }
            }
            Ok(value) => {
                let editor = self
                    .cells
                    .entry(key)
                    .or_insert_with(|| CellEditor::new(baseline));
                editor.stage(value, now_ms);
                CommitOutcome::Staged {
                    value,
                    deadline_ms: now_ms + EDIT_DEBOUNCE_MS,
                }
            }
        }
    }

    /// Cells whose quiet period has elapsed, in key order so flush output is
    /// deterministic.
    pub fn due(&self, now_ms: u64) -> Vec<CellKey> {
        let mut keys: Vec<CellKey> = self
            .cells
            .iter()
            .filter(|(_, c)| c.is_due(now_ms))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Editing -> Saving; returns the staged value to write.
    pub fn begin_save(&mut self, key: &CellKey) -> Option<Option<u32>> {
        let editor = self.cells.get_mut(key)?;
        if editor.state != CellState::Editing {
            return None;
        }
        editor.state = CellState::Saving;
        Some(editor.staged)
    }

    /// Settle a save. On success the cell is done; on failure the caller
    /// gets the known-good value to restore. Either way the cell leaves the
    /// queue and the next edit re-reads the store.
    pub fn finish_save(&mut self, key: &CellKey, written: bool) -> Option<u32> {
        let editor = self.cells.remove(key);
        match editor {
            Some(c) if !written => c.committed,
            _ => None,
        }
    }

    pub fn state_of(&self, key: &CellKey) -> CellState {
        self.cells
            .get(key)
            .map(|c| c.state)
            .unwrap_or(CellState::Clean)
    }

    /// Staged (not yet saving) cell count, for the shell's dirty indicator.
    pub fn pending_count(&self) -> usize {
        self.cells
            .values()
            .filter(|c| c.state == CellState::Editing)
            .count()
    }

    pub fn clear(&mut self) {
        self.cells.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn key(student: &str, subject: &str) -> CellKey {
        CellKey {
            class_id: "c1".to_string(),
            exam_id: "e1".to_string(),
            student_id: student.to_string(),
            subject: subject.to_string(),
        }
    }

    #[test]
    fn parse_accepts_whole_marks_and_null() {
        assert_eq!(parse_mark_value(&json!(null)), Ok(None));
        assert_eq!(parse_mark_value(&json!(0)), Ok(Some(0)));
        assert_eq!(parse_mark_value(&json!(100)), Ok(Some(100)));
        assert_eq!(parse_mark_value(&json!(70.0)), Ok(Some(70)));
    }

    #[test]
    fn parse_rejects_instead_of_clamping() {
        assert!(parse_mark_value(&json!(101)).is_err());
        assert!(parse_mark_value(&json!(-1)).is_err());
        assert!(parse_mark_value(&json!(70.5)).is_err());
        assert!(parse_mark_value(&json!("70")).is_err());
        assert!(parse_mark_value(&json!(true)).is_err());
        assert!(parse_mark_value(&json!({"v": 70})).is_err());
    }

    #[test]
    fn recommit_coalesces_and_pushes_deadline() {
        let mut q = EditQueue::new();
        let k = key("s1", "MATH");
        let out = q.commit(k.clone(), Some(50), &json!(60), 1_000);
        assert_eq!(
            out,
            CommitOutcome::Staged {
                value: Some(60),
                deadline_ms: 1_400
            }
        );

        // Second burst keystroke replaces the value and restarts the window.
        let out = q.commit(k.clone(), Some(50), &json!(70), 1_200);
        assert_eq!(
            out,
            CommitOutcome::Staged {
                value: Some(70),
                deadline_ms: 1_600
            }
        );
        assert_eq!(q.pending_count(), 1);
        assert!(q.due(1_599).is_empty());
        assert_eq!(q.due(1_600), vec![k.clone()]);
        assert_eq!(q.begin_save(&k), Some(Some(70)));
    }

    #[test]
    fn cells_debounce_independently() {
        let mut q = EditQueue::new();
        let a = key("s1", "MATH");
        let b = key("s2", "ENG");
        q.commit(a.clone(), None, &json!(40), 0);
        q.commit(b.clone(), None, &json!(55), 100);
        assert_eq!(q.pending_count(), 2);
        assert_eq!(q.due(400), vec![a.clone()]);
        let mut both = q.due(500);
        both.sort();
        assert_eq!(both, vec![a, b]);
    }

    #[test]
    fn rejection_drops_staged_edit_and_restores_baseline() {
        let mut q = EditQueue::new();
        let k = key("s1", "MATH");
        q.commit(k.clone(), Some(50), &json!(60), 0);
        let out = q.commit(k.clone(), Some(50), &json!(104), 100);
        match out {
            CommitOutcome::Rejected { restored, .. } => assert_eq!(restored, Some(50)),
            other => panic!("expected rejection, got {:?}", other),
        }
        assert_eq!(q.pending_count(), 0);
        assert_eq!(q.state_of(&k), CellState::Clean);
    }

    #[test]
    fn baseline_survives_coalesced_commits() {
        let mut q = EditQueue::new();
        let k = key("s1", "MATH");
        q.commit(k.clone(), Some(50), &json!(60), 0);
        // The 60 was never written, so a failure must restore 50, not 60.
        q.commit(k.clone(), Some(50), &json!(70), 100);
        assert_eq!(q.begin_save(&k), Some(Some(70)));
        assert_eq!(q.state_of(&k), CellState::Saving);
        assert_eq!(q.finish_save(&k, false), Some(50));
        assert_eq!(q.state_of(&k), CellState::Clean);
    }

    #[test]
    fn successful_save_retires_the_cell() {
        let mut q = EditQueue::new();
        let k = key("s1", "MATH");
        q.commit(k.clone(), None, &json!(null), 0);
        assert_eq!(q.begin_save(&k), Some(None));
        assert_eq!(q.finish_save(&k, true), None);
        assert_eq!(q.pending_count(), 0);
    }

    #[test]
    fn begin_save_only_takes_editing_cells() {
        let mut q = EditQueue::new();
        let k = key("s1", "MATH");
        assert_eq!(q.begin_save(&k), None);
        q.commit(k.clone(), None, &json!(10), 0);
        assert_eq!(q.begin_save(&k), Some(Some(10)));
        // Already saving; a second take must not double-write.
        assert_eq!(q.begin_save(&k), None);
    }
}
