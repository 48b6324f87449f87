use super::*;

use crate::LoaderError;

use rand::Rng;

//-----------------------------------------------------------------------------

// Density source backed by a vector of per-segment counts.
struct Counts {
    ref_length: usize,
    segment: usize,
    counts: Vec<usize>,
    queries: usize,
}

impl Counts {
    fn new(ref_length: usize, segment: usize, counts: Vec<usize>) -> Self {
        Counts { ref_length, segment, counts, queries: 0 }
    }

    fn uniform(ref_length: usize, segment: usize, per_segment: usize) -> Self {
        let segments = ref_length.div_ceil(segment);
        Self::new(ref_length, segment, vec![per_segment; segments])
    }
}

impl AlignmentDensity for Counts {
    fn ref_length(&self) -> usize {
        self.ref_length
    }

    fn segment_size(&self) -> usize {
        self.segment
    }

    fn segment_count(&mut self, segment: usize) -> Result<usize> {
        self.queries += 1;
        Ok(self.counts.get(segment).copied().unwrap_or(0))
    }

    fn count_up_to(&mut self, limit: usize) -> Result<usize> {
        Ok(self.counts.iter().sum::<usize>().min(limit))
    }
}

fn plan(source: &mut Counts, params: &PlannerParams) -> ChunkPlans {
    let result = plan_chunks(source, params, &CancelToken::new());
    assert!(result.is_ok(), "Failed to plan chunks: {}", result.unwrap_err());
    result.unwrap()
}

fn check_plan(plan: &ChunkPlan, source: &Counts, name: &str) {
    let entries = plan.entries();
    assert!(!entries.is_empty(), "Empty {} plan", name);
    assert_eq!(entries[0].start, 0, "The {} plan does not start at 0", name);
    let last = entries.last().unwrap();
    assert_eq!(last.start, source.ref_length, "The {} plan does not end at the reference length", name);
    assert_eq!(last.align_count, 0, "The sentinel of the {} plan has alignments", name);
    for pair in entries.windows(2) {
        assert!(pair[0].start < pair[1].start, "Non-increasing starts in the {} plan: {:?}", name, entries);
    }
    let total: usize = source.counts.iter().sum();
    assert_eq!(plan.total_count(), total, "Wrong total count in the {} plan", name);
}

//-----------------------------------------------------------------------------

#[test]
fn uniform_density() {
    let mut source = Counts::uniform(10000, 100, 50);
    let plans = plan(&mut source, &PlannerParams::default());
    check_plan(&plans.align, &source, "alignment");
    check_plan(&plans.graph, &source, "graph");

    assert_eq!(plans.align.len(), 5, "Wrong number of alignment chunks");
    for (k, range, count) in plans.align.iter() {
        assert_eq!(range, k * 2000..(k + 1) * 2000, "Wrong interval for alignment chunk {}", k);
        assert_eq!(count, 1000, "Wrong count for alignment chunk {}", k);
    }

    // Graph chunks are limited to 8 segments.
    assert_eq!(plans.graph.len(), 13, "Wrong number of graph chunks");
    for (k, range, _) in plans.graph.iter() {
        assert!(range.len() <= 800, "Graph chunk {} is too long: {:?}", k, range);
    }
}

#[test]
fn sparse_reference_collapses() {
    let mut source = Counts::uniform(10000, 100, 5);
    let plans = plan(&mut source, &PlannerParams::default());
    let expected = ChunkPlan::new(vec![ChunkInfo::new(0, 500), ChunkInfo::new(10000, 0)]);
    assert_eq!(plans.align, expected, "Wrong alignment plan");
    assert_eq!(plans.graph, expected, "Wrong graph plan");
    assert_eq!(source.queries, 0, "Segments were sampled after a failed probe");
}

#[test]
fn empty_reference() {
    let mut source = Counts::new(0, 100, Vec::new());
    let plans = plan(&mut source, &PlannerParams::default());
    assert_eq!(plans.align.entries(), &[ChunkInfo::new(0, 0)], "Wrong plan for an empty reference");
    assert!(plans.align.is_empty(), "Empty reference has chunks");
    assert_eq!(plans.align.chunk_for_pos(0), None, "Found a chunk in an empty reference");
}

#[test]
fn empty_regions_separate_chunks() {
    // 10 dense segments, 40 empty segments, 10 dense segments.
    let mut counts = vec![60; 10];
    counts.extend(vec![0; 40]);
    counts.extend(vec![60; 10]);
    let mut source = Counts::new(6000, 100, counts);
    let plans = plan(&mut source, &PlannerParams::default());
    check_plan(&plans.align, &source, "alignment");

    // The first chunk ends where the data ends, the gap is its own chunk, and the second dense region follows.
    let starts: Vec<usize> = plans.align.entries().iter().map(|x| x.start).collect();
    assert_eq!(starts, vec![0, 1000, 5000, 6000], "Wrong alignment chunk starts");
    assert_eq!(plans.align.align_count(1), 0, "The gap chunk has alignments");
}

#[test]
fn oversized_segment_gets_own_chunk() {
    let mut counts = vec![100; 5];
    counts.push(5000);
    counts.extend(vec![100; 5]);
    let mut source = Counts::new(1100, 100, counts);
    let plans = plan(&mut source, &PlannerParams::default());
    check_plan(&plans.align, &source, "alignment");
    let position = plans.align.chunk_for_pos(550).unwrap();
    assert_eq!(plans.align.range(position), 500..600, "The dense segment was not isolated");
    assert_eq!(plans.align.align_count(position), 5000, "Wrong count for the dense segment");
}

#[test]
fn partial_last_segment() {
    let mut source = Counts::uniform(10050, 100, 50);
    let plans = plan(&mut source, &PlannerParams::default());
    check_plan(&plans.align, &source, "alignment");
    check_plan(&plans.graph, &source, "graph");
    assert_eq!(plans.align.range(plans.align.len() - 1).end, 10050, "Last chunk does not reach the end");
}

#[test]
fn random_density() {
    let mut rng = rand::thread_rng();
    let params = PlannerParams::default();
    for _ in 0..20 {
        let segments = rng.gen_range(1..300);
        let counts: Vec<usize> = (0..segments).map(|_| {
            if rng.gen_bool(0.3) { 0 } else { rng.gen_range(0..400) }
        }).collect();
        let ref_length = segments * 100 - rng.gen_range(0..100);
        let mut source = Counts::new(ref_length, 100, counts);
        let plans = plan(&mut source, &params);
        check_plan(&plans.align, &source, "alignment");
        check_plan(&plans.graph, &source, "graph");

        // Planning is deterministic.
        let again = plan(&mut source, &params);
        assert_eq!(plans, again, "Planning is not idempotent");

        for (k, range, _) in plans.align.iter() {
            assert_eq!(plans.align.chunk_for_pos(range.start), Some(k), "Wrong chunk for the start of chunk {}", k);
            assert_eq!(plans.align.chunk_for_pos(range.end - 1), Some(k), "Wrong chunk for the end of chunk {}", k);
        }
        assert_eq!(plans.align.chunk_for_pos(ref_length), None, "Found a chunk past the end");
    }
}

#[test]
fn cancelled_planning() {
    let mut source = Counts::uniform(10000, 100, 50);
    let cancel = CancelToken::new();
    cancel.cancel();
    let result = plan_chunks(&mut source, &PlannerParams::default(), &cancel);
    assert!(matches!(result, Err(LoaderError::Cancelled)), "Planning was not cancelled");
}

//-----------------------------------------------------------------------------
