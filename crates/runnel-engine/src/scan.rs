//! Resumable barrier scans over a region's edges.
//!
//! A barrier is complete once a predicate holds for every proxy of every
//! element. Remote halves of the predicate arrive by message, so a scan
//! can stop partway and resume on a later turn. [`ScanCursor`] remembers
//! the first `(element, proxy)` position that was not yet satisfied.
//! Everything before it is never revisited.

use indexmap::IndexMap;

use runnel_core::ElementId;
use runnel_element::Element;

/// Saved position of a barrier scan.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ScanCursor {
    element: usize,
    proxy: usize,
    started: bool,
}

impl ScanCursor {
    /// A cursor at the beginning, not yet started.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the phase's entry pass has run.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Mark the entry pass as done.
    pub fn start(&mut self) {
        self.started = true;
    }

    /// `(element index, proxy index)` of the next position to visit.
    pub fn position(&self) -> (usize, usize) {
        (self.element, self.proxy)
    }

    /// Back to the beginning, not started.
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Visit every position from the cursor onwards until `visit` returns
    /// `false`.
    ///
    /// Returns `Ok(true)` and resets the cursor when every position has
    /// been satisfied. Returns `Ok(false)` and parks the cursor on the
    /// first unsatisfied position otherwise.
    pub fn scan<E>(
        &mut self,
        elements: &mut IndexMap<ElementId, Element>,
        mut visit: impl FnMut(&mut Element, usize) -> Result<bool, E>,
    ) -> Result<bool, E> {
        while let Some((_, element)) = elements.get_index_mut(self.element) {
            while self.proxy < element.proxy_count() {
                if !visit(element, self.proxy)? {
                    return Ok(false);
                }
                self.proxy += 1;
            }
            self.element += 1;
            self.proxy = 0;
        }
        self.reset();
        Ok(true)
    }
}

/// Apply `visit` to every proxy position once, ignoring its verdict.
///
/// Used as the send pass ahead of a barrier: every edge must have emitted
/// its half before any region waits on the other half.
pub fn visit_all<E>(
    elements: &mut IndexMap<ElementId, Element>,
    mut visit: impl FnMut(&mut Element, usize) -> Result<bool, E>,
) -> Result<(), E> {
    for element in elements.values_mut() {
        for index in 0..element.proxy_count() {
            visit(element, index)?;
        }
    }
    Ok(())
}
