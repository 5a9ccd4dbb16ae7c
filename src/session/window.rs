//! Window rebalance planning.
//!
//! Pure functions over page indices; the updater applies the resulting plan
//! while holding the store and window locks.

use std::ops::Range;

use crate::types::TotalPages;

/// Changes needed to move the window onto the desired range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct WindowPlan {
    pub desired: Range<usize>,
    /// Held pages outside `desired`.
    pub dirty: Vec<usize>,
    /// Pages in `desired` not held yet, ascending.
    pub missing: Vec<usize>,
}

/// Desired window centred on `current`, shifted to stay inside `[0, total)`.
///
/// Returns `None` when the whole result fits in the window.
pub(crate) fn desired_range(current: usize, buffer: usize, total: usize) -> Option<Range<usize>> {
    if total <= buffer {
        return None;
    }
    let split = buffer / 2;
    let mid = current.clamp(split, total - 1 - split);
    Some(mid - split..mid + split + 1)
}

/// Computes the rebalance for a window holding `held` pages.
///
/// `None` means nothing to do: the total is unknown, the result fits the
/// window, or every desired page is already held.
pub(crate) fn plan<I>(current: usize, buffer: usize, total: TotalPages, held: I) -> Option<WindowPlan>
where
    I: IntoIterator<Item = usize>,
{
    let total = total.known()?;
    let desired = desired_range(current, buffer, total)?;
    let mut dirty = Vec::new();
    let mut present = vec![false; desired.len()];
    for index in held {
        if desired.contains(&index) {
            present[index - desired.start] = true;
        } else {
            dirty.push(index);
        }
    }
    let missing: Vec<usize> = desired
        .clone()
        .zip(present)
        .filter_map(|(index, held)| (!held).then_some(index))
        .collect();
    if missing.is_empty() {
        return None;
    }
    dirty.sort_unstable();
    Some(WindowPlan {
        desired,
        dirty,
        missing,
    })
}
