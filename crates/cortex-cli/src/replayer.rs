//! Dataset pacing seam. Decoding and pacing a real dataset file is out of
//! scope (spec.md §1); this only defines the interface the scheduler
//! needs and a minimal in-memory implementation enough to drive the run
//! loop and the E2E scenarios in spec.md §8.

/// Feeds interleaved sample chunks to a [`cortex_scheduler::Scheduler`]
/// one call at a time. A real implementation would decode and pace a
/// dataset file on a dedicated thread (spec.md §5); this crate only
/// defines the seam.
pub trait Replayer {
    /// Copy the next chunk of samples into `out`, replacing its
    /// contents. Returns `false` once the stream is exhausted.
    fn next_chunk(&mut self, out: &mut Vec<f32>) -> bool;
}

/// A fixed in-memory sample buffer, served in `chunk_len`-sample pieces.
/// Not a dataset decoder: callers construct it directly from samples
/// already in memory (tests, or a caller that decoded a file elsewhere).
pub struct InMemoryReplayer {
    samples: Vec<f32>,
    cursor: usize,
    chunk_len: usize,
}

impl InMemoryReplayer {
    /// Serve `samples` in pieces of `chunk_len` samples (the last piece
    /// may be shorter).
    #[must_use]
    pub fn new(samples: Vec<f32>, chunk_len: usize) -> Self {
        Self { samples, cursor: 0, chunk_len: chunk_len.max(1) }
    }
}

impl Replayer for InMemoryReplayer {
    fn next_chunk(&mut self, out: &mut Vec<f32>) -> bool {
        out.clear();
        if self.cursor >= self.samples.len() {
            return false;
        }
        let end = (self.cursor + self.chunk_len).min(self.samples.len());
        out.extend_from_slice(&self.samples[self.cursor..end]);
        self.cursor = end;
        true
    }
}
