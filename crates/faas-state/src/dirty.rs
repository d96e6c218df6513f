//! Dirty-byte tracking as a merged interval set, the segment-set alternative
//! to a byte-per-byte flag array that §4.B's Design Note explicitly permits
//! ("either representation is permitted provided the net writes are
//! identical"). Chosen here because `pushPartial` only ever needs the
//! maximal dirty runs, not individual flags.

/// A set of disjoint, half-open `[start, end)` byte ranges, always kept
/// sorted and merged.
#[derive(Debug, Default, Clone)]
pub struct DirtySet {
    segments: Vec<(usize, usize)>,
}

impl DirtySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, start: usize, end: usize) {
        debug_assert!(start <= end);
        if start == end {
            return;
        }
        self.segments.push((start, end));
        self.segments = merge_segments(&self.segments);
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[(usize, usize)] {
        &self.segments
    }

    pub fn clear(&mut self) {
        self.segments.clear();
    }

    /// Remove and return the current segments, leaving the set empty.
    pub fn take(&mut self) -> Vec<(usize, usize)> {
        std::mem::take(&mut self.segments)
    }
}

/// Merge a set of (possibly unsorted, possibly overlapping or touching)
/// half-open ranges into the minimal disjoint, sorted cover.
pub fn merge_segments(segments: &[(usize, usize)]) -> Vec<(usize, usize)> {
    let mut sorted: Vec<(usize, usize)> = segments.to_vec();
    sorted.sort_by_key(|s| s.0);

    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(sorted.len());
    for (start, end) in sorted {
        match merged.last_mut() {
            Some(last) if start <= last.1 => last.1 = last.1.max(end),
            _ => merged.push((start, end)),
        }
    }
    merged
}
