//! Adaptive chunk planning for alignment and graph data.
//!
//! A reference sequence is divided into range chunks so that a single chunk contains a bounded number of alignments.
//! The planner scans the reference one segment (archive row) at a time, using the number of alignments starting in each segment as the density estimate.
//! Two independent plans are produced: one for alignment chunks and one for graph (pileup) chunks.
//!
//! A plan is a list of [`ChunkInfo`] entries with strictly increasing start positions.
//! Chunk `k` covers the interval from entry `k` to entry `k + 1`.
//! The last entry is a sentinel at the end of the reference with zero alignments.

use crate::Result;
use crate::utils::CancelToken;

use std::ops::Range;

#[cfg(test)]
mod tests;

//-----------------------------------------------------------------------------

/// Parameters for chunk planning.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannerParams {
    /// Target number of alignments in an alignment chunk.
    pub align_chunk_size: usize,
    /// Target number of alignments in a graph chunk.
    pub graph_chunk_size: usize,
    /// Number of empty segments that separate alignment chunks.
    pub align_empty_segments: usize,
    /// Number of empty segments that separate graph chunks.
    pub graph_empty_segments: usize,
    /// A chunk is closed before it would reach this multiple of the target size.
    pub oversize_factor: usize,
    /// Maximum length of a non-empty graph chunk in segments.
    pub graph_span_segments: usize,
    /// Number of archive rows in a reference sequence data chunk.
    pub seq_data_rows: usize,
}

impl Default for PlannerParams {
    fn default() -> Self {
        PlannerParams {
            align_chunk_size: 1000,
            graph_chunk_size: 10000,
            align_empty_segments: 16,
            graph_empty_segments: 4,
            oversize_factor: 2,
            graph_span_segments: 8,
            seq_data_rows: 8,
        }
    }
}

//-----------------------------------------------------------------------------

/// Start of a chunk and the number of alignments starting in it.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Start position of the chunk.
    pub start: usize,
    /// Number of alignments starting in the chunk.
    pub align_count: usize,
}

impl ChunkInfo {
    /// Creates a new chunk entry.
    pub fn new(start: usize, align_count: usize) -> Self {
        ChunkInfo { start, align_count }
    }
}

/// A chunk plan over a reference sequence.
///
/// # Examples
///
/// ```
/// use csra_base::chunks::{ChunkInfo, ChunkPlan};
///
/// let plan = ChunkPlan::new(vec![ChunkInfo::new(0, 10), ChunkInfo::new(500, 3), ChunkInfo::new(800, 0)]);
/// assert_eq!(plan.len(), 2);
/// assert_eq!(plan.range(1), 500..800);
/// assert_eq!(plan.chunk_for_pos(499), Some(0));
/// assert_eq!(plan.chunk_for_pos(800), None);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlan {
    entries: Vec<ChunkInfo>,
}

impl ChunkPlan {
    /// Creates a plan from the given entries, including the sentinel.
    pub fn new(entries: Vec<ChunkInfo>) -> Self {
        ChunkPlan { entries }
    }

    /// Creates a plan that covers the entire reference with a single chunk.
    pub fn single(ref_length: usize, align_count: usize) -> Self {
        if ref_length == 0 {
            return ChunkPlan { entries: vec![ChunkInfo::new(0, 0)] };
        }
        ChunkPlan { entries: vec![ChunkInfo::new(0, align_count), ChunkInfo::new(ref_length, 0)] }
    }

    /// Returns all entries, including the sentinel.
    pub fn entries(&self) -> &[ChunkInfo] {
        &self.entries
    }

    /// Returns the number of chunks.
    pub fn len(&self) -> usize {
        self.entries.len().saturating_sub(1)
    }

    /// Returns `true` if the plan has no chunks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the reference interval covered by chunk `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.len()`.
    pub fn range(&self, k: usize) -> Range<usize> {
        self.entries[k].start..self.entries[k + 1].start
    }

    /// Returns the number of alignments starting in chunk `k`.
    pub fn align_count(&self, k: usize) -> usize {
        self.entries[k].align_count
    }

    /// Returns the total number of alignments in the plan.
    pub fn total_count(&self) -> usize {
        self.entries.iter().map(|x| x.align_count).sum()
    }

    /// Returns an iterator over `(chunk index, interval, alignment count)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, Range<usize>, usize)> + '_ {
        self.entries.windows(2).enumerate().map(|(k, pair)| (k, pair[0].start..pair[1].start, pair[0].align_count))
    }

    /// Returns the chunk containing the given position, or [`None`] if the position is outside the plan.
    pub fn chunk_for_pos(&self, pos: usize) -> Option<usize> {
        let next = self.entries.partition_point(|x| x.start <= pos);
        if next == 0 || next >= self.entries.len() {
            None
        } else {
            Some(next - 1)
        }
    }
}

/// Alignment and graph chunk plans for a reference sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkPlans {
    /// Plan for alignment chunks.
    pub align: ChunkPlan,
    /// Plan for graph and pileup chunks.
    pub graph: ChunkPlan,
}

//-----------------------------------------------------------------------------

/// Source of alignment density information for a reference sequence.
pub trait AlignmentDensity {
    /// Returns the length of the reference sequence.
    fn ref_length(&self) -> usize;

    /// Returns the length of a segment.
    fn segment_size(&self) -> usize;

    /// Returns the number of alignments starting in the given segment.
    fn segment_count(&mut self, segment: usize) -> Result<usize>;

    /// Counts alignments on the reference, stopping at `limit`.
    fn count_up_to(&mut self, limit: usize) -> Result<usize>;
}

// Running state for building one plan.
struct PlanBuilder {
    target: usize,
    empty_len: usize,
    oversize: usize,
    span_cap: Option<usize>,
    entries: Vec<ChunkInfo>,
    current: ChunkInfo,
    data_end: usize,
}

impl PlanBuilder {
    fn new(target: usize, empty_len: usize, oversize: usize, span_cap: Option<usize>) -> Self {
        PlanBuilder {
            target: target.max(1),
            empty_len, oversize, span_cap,
            entries: Vec::new(),
            current: ChunkInfo::new(0, 0),
            data_end: 0,
        }
    }

    fn close(&mut self, next_start: usize) {
        self.entries.push(self.current);
        self.current = ChunkInfo::new(next_start, 0);
    }

    fn add_segment(&mut self, pos: usize, segment: usize, end: usize, count: usize) {
        let oversized = pos > self.current.start && self.current.align_count + count >= self.oversize * self.target;
        let after_gap = pos >= self.current.start + self.empty_len && count > 0 && self.current.align_count == 0;
        if oversized || after_gap {
            self.close(pos);
        }

        if count > 0 {
            self.current.align_count += count;
            self.data_end = end;
        } else if self.current.align_count > 0 && end >= self.data_end + self.empty_len {
            // The empty region starts the next chunk.
            self.close(self.data_end);
        }

        let too_long = match self.span_cap {
            Some(cap) => self.current.align_count > 0 && pos + segment - self.current.start >= cap,
            None => false,
        };
        if self.current.align_count >= self.target || too_long {
            self.close(end);
        }
    }

    fn finish(mut self, ref_length: usize) -> ChunkPlan {
        if ref_length == 0 {
            return ChunkPlan::single(0, 0);
        }
        if self.current.align_count > 0 || self.entries.is_empty() {
            self.entries.push(self.current);
        }
        self.entries.push(ChunkInfo::new(ref_length, 0));
        ChunkPlan::new(self.entries)
    }
}

/// Computes alignment and graph chunk plans for a reference sequence.
///
/// A bounded probe first counts alignments up to the alignment chunk size.
/// If the reference has fewer alignments, both plans consist of a single chunk.
/// Otherwise the density is sampled once per segment.
///
/// # Errors
///
/// Passes through errors from the density source.
/// Returns [`crate::LoaderError::Cancelled`] if the request is cancelled.
pub fn plan_chunks<D: AlignmentDensity>(source: &mut D, params: &PlannerParams, cancel: &CancelToken) -> Result<ChunkPlans> {
    cancel.check()?;
    let ref_length = source.ref_length();
    let segment = source.segment_size().max(1);

    let probe = source.count_up_to(params.align_chunk_size)?;
    if probe < params.align_chunk_size {
        let plan = ChunkPlan::single(ref_length, probe);
        return Ok(ChunkPlans { align: plan.clone(), graph: plan });
    }

    let mut align = PlanBuilder::new(params.align_chunk_size, params.align_empty_segments * segment, params.oversize_factor, None);
    let mut graph = PlanBuilder::new(
        params.graph_chunk_size, params.graph_empty_segments * segment,
        params.oversize_factor, Some(params.graph_span_segments * segment)
    );
    let mut pos = 0;
    let mut row = 0;
    while pos < ref_length {
        cancel.poll(row + 1)?;
        let end = ref_length.min(pos + segment);
        let count = source.segment_count(row)?;
        align.add_segment(pos, segment, end, count);
        graph.add_segment(pos, segment, end, count);
        pos += segment;
        row += 1;
    }

    Ok(ChunkPlans { align: align.finish(ref_length), graph: graph.finish(ref_length) })
}

//-----------------------------------------------------------------------------
