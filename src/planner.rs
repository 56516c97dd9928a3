//! Chunk boundaries for multi-chunk downloads.
//!
//! The plan is a pure function of `(total_size, threads)`, so a resumed run
//! recomputes exactly the ranges the interrupted run used and the on-disk
//! `.part<id>` files line up with them.

/// One inclusive byte range of the target file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkRange {
    pub id: usize,
    pub start: u64,
    /// Inclusive.
    pub end: u64,
}

impl ChunkRange {
    pub fn expected_size(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPlan {
    total_size: u64,
    chunks: Vec<ChunkRange>,
}

impl ChunkPlan {
    /// Splits `total_size` bytes into `threads` ranges of `total_size / threads`
    /// bytes; the last range absorbs the remainder. The count is capped at
    /// `total_size` so no range is empty, and an empty file yields no ranges.
    pub fn new(total_size: u64, threads: usize) -> Self {
        let count = (threads.max(1) as u64).min(total_size);
        let mut chunks = Vec::with_capacity(count as usize);
        if count == 0 {
            return Self { total_size, chunks };
        }

        let chunk_size = total_size / count;
        for i in 0..count {
            let start = i * chunk_size;
            let end = if i == count - 1 {
                total_size - 1
            } else {
                start + chunk_size - 1
            };
            chunks.push(ChunkRange { id: i as usize, start, end });
        }

        Self { total_size, chunks }
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn chunks(&self) -> &[ChunkRange] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn expected_sizes(&self) -> Vec<u64> {
        self.chunks.iter().map(ChunkRange::expected_size).collect()
    }
}
