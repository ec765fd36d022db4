//! Piece-window readiness tracking for open streams.
//!
//! Turns raw piece-availability events into per-file progress and a one-shot
//! "ready" signal. A file is tracked at most once per session lifetime, no
//! matter how many viewers open it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::ops::{Range, RangeInclusive};

use crate::backend::FileEntry;

/// Inclusive range of `unit`-sized pieces covering a file.
///
/// Returns `None` for empty files, a zero unit, or pieces past `u32::MAX`.
pub fn piece_span(offset: u64, length: u64, unit: u64) -> Option<RangeInclusive<u32>> {
    if length == 0 || unit == 0 {
        return None;
    }
    let first = u32::try_from(offset / unit).ok()?;
    let last = u32::try_from(offset.checked_add(length - 1)? / unit).ok()?;
    Some(first..=last)
}

/// Logical-piece range to prioritize so every verification unit touching the
/// file is fetched whole.
///
/// Returns a half-open range suitable for `select_pieces`.
pub fn verification_selection(
    file: &FileEntry,
    piece_length: u64,
    verification_unit_length: u64,
) -> Option<Range<u32>> {
    if piece_length == 0 {
        return None;
    }
    let unit = verification_unit_length.max(piece_length);
    let span = piece_span(file.offset, file.length, unit)?;

    // Units need not be a whole number of pieces: round outwards.
    let start = u64::from(*span.start()) * unit / piece_length;
    let end = (u64::from(*span.end()) + 1)
        .checked_mul(unit)?
        .div_ceil(piece_length);
    Some(u32::try_from(start).ok()?..u32::try_from(end).ok()?)
}

/// Progress notification for one tracked file.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowUpdate {
    pub file_index: usize,
    /// Fraction of the file's pieces available, 0.0 to 1.0
    pub progress: f64,
    /// Set exactly once, on the update that completes the window
    pub ready: bool,
}

/// Pending pieces of one file.
#[derive(Debug, Clone)]
pub struct PieceWindow {
    file_index: usize,
    span: Option<RangeInclusive<u32>>,
    pending: BTreeSet<u32>,
}

impl PieceWindow {
    /// Seeds the window with every piece of the file not yet available.
    pub fn new(
        file_index: usize,
        file: &FileEntry,
        piece_length: u64,
        is_available: impl Fn(u32) -> bool,
    ) -> Self {
        let span = piece_span(file.offset, file.length, piece_length);
        let pending = span
            .clone()
            .map(|span| span.filter(|&piece| !is_available(piece)).collect())
            .unwrap_or_default();
        Self {
            file_index,
            span,
            pending,
        }
    }

    pub fn file_index(&self) -> usize {
        self.file_index
    }

    pub fn first_piece(&self) -> Option<u32> {
        self.span.as_ref().map(|span| *span.start())
    }

    pub fn last_piece(&self) -> Option<u32> {
        self.span.as_ref().map(|span| *span.end())
    }

    /// Number of pieces the file spans.
    pub fn total(&self) -> u32 {
        self.span
            .as_ref()
            .map_or(0, |span| span.end() - span.start() + 1)
    }

    pub fn pending(&self) -> &BTreeSet<u32> {
        &self.pending
    }

    pub fn progress(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 1.0;
        }
        f64::from(total - self.pending.len() as u32) / f64::from(total)
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Removes `piece` from the pending set. Returns true if it was pending.
    pub fn mark_available(&mut self, piece: u32) -> bool {
        self.pending.remove(&piece)
    }

    fn update(&self, ready: bool) -> WindowUpdate {
        WindowUpdate {
            file_index: self.file_index,
            progress: self.progress(),
            ready,
        }
    }
}

/// All piece windows of one session.
#[derive(Debug, Default)]
pub struct StreamWindowTracker {
    /// Files ever attached during this session lifetime
    attached: HashSet<usize>,
    windows: HashMap<usize, PieceWindow>,
}

impl StreamWindowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts tracking a file and performs the initial evaluation.
    ///
    /// Returns `None` if the file was already attached earlier in this
    /// session, whether or not it has completed since.
    pub fn attach(
        &mut self,
        file_index: usize,
        file: &FileEntry,
        piece_length: u64,
        is_available: impl Fn(u32) -> bool,
    ) -> Option<WindowUpdate> {
        if !self.attached.insert(file_index) {
            return None;
        }

        let window = PieceWindow::new(file_index, file, piece_length, is_available);
        let ready = window.is_complete();
        let update = window.update(ready);
        if !ready {
            self.windows.insert(file_index, window);
        }
        Some(update)
    }

    /// Applies a piece-availability event to every window waiting on it.
    ///
    /// Completed windows are dropped, so later duplicates produce nothing.
    pub fn on_piece_available(&mut self, piece: u32) -> Vec<WindowUpdate> {
        let mut updates = Vec::new();
        for window in self.windows.values_mut() {
            if window.mark_available(piece) {
                updates.push(window.update(window.is_complete()));
            }
        }

        self.windows.retain(|_, window| !window.is_complete());
        updates.sort_by_key(|update| update.file_index);
        updates
    }

    /// Re-checks every pending piece against the backend's bitfield.
    ///
    /// Recovers windows whose availability events were lost. Emits one
    /// update per window that changed.
    pub fn resync(&mut self, is_available: impl Fn(u32) -> bool) -> Vec<WindowUpdate> {
        let mut updates = Vec::new();
        for window in self.windows.values_mut() {
            let before = window.pending.len();
            window.pending.retain(|&piece| !is_available(piece));
            if window.pending.len() != before {
                updates.push(window.update(window.is_complete()));
            }
        }

        self.windows.retain(|_, window| !window.is_complete());
        updates.sort_by_key(|update| update.file_index);
        updates
    }

    pub fn is_attached(&self, file_index: usize) -> bool {
        self.attached.contains(&file_index)
    }

    /// Window of a file still waiting on pieces.
    pub fn window(&self, file_index: usize) -> Option<&PieceWindow> {
        self.windows.get(&file_index)
    }

    /// Number of windows still waiting on pieces.
    pub fn active_windows(&self) -> usize {
        self.windows.len()
    }
}
