use serde::{Deserialize, Serialize};

/// A half-open byte range `[start, end)` within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        debug_assert!(start <= end, "range start past end");
        Self { start, end }
    }

    /// Range covering a whole file of `size` bytes.
    pub fn whole(size: u64) -> Self {
        Self { start: 0, end: size }
    }

    /// Number of bytes in the range.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Cuts a file of `file_size` bytes into contiguous ranges of `segment_size`.
///
/// The last range is truncated to the remainder. A `segment_size` of 0 means
/// "no segmentation" and yields a single range spanning the whole file. A
/// zero-length file with a positive segment size yields no ranges.
pub fn plan_segments(file_size: u64, segment_size: u64) -> Vec<ByteRange> {
    if segment_size == 0 {
        return vec![ByteRange::whole(file_size)];
    }

    let count = file_size.div_ceil(segment_size);
    (0..count)
        .map(|i| {
            let start = i * segment_size;
            let end = (start + segment_size).min(file_size);
            ByteRange::new(start, end)
        })
        .collect()
}

/// A segment's bytes as received by a writing endpoint.
#[derive(Debug, Clone)]
pub struct Chunk {
    /// Byte offset within the destination file.
    pub offset: u64,
    /// Raw segment data.
    pub data: Vec<u8>,
    /// Destination file name, relative to the writer's root.
    pub file_name: String,
    /// SHA-256 hex checksum of `data` (empty means no verification).
    pub checksum: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(ranges: &[ByteRange], size: u64) {
        let mut expected_start = 0;
        for r in ranges {
            assert_eq!(r.start, expected_start, "ranges must be contiguous");
            assert!(r.end > r.start || size == 0);
            expected_start = r.end;
        }
        assert_eq!(expected_start, size);
    }

    #[test]
    fn exact_multiple() {
        let ranges = plan_segments(12, 4);
        assert_eq!(ranges.len(), 3);
        assert_covers(&ranges, 12);
        assert_eq!(ranges[2], ByteRange::new(8, 12));
    }

    #[test]
    fn last_segment_truncated() {
        let ranges = plan_segments(10, 4);
        assert_eq!(ranges.len(), 3);
        assert_covers(&ranges, 10);
        // n - s*(k-1) = 10 - 4*2
        assert_eq!(ranges[2].len(), 2);
    }

    #[test]
    fn segment_larger_than_file() {
        let ranges = plan_segments(3, 1024);
        assert_eq!(ranges, vec![ByteRange::new(0, 3)]);
    }

    #[test]
    fn zero_segment_size_is_whole_file() {
        assert_eq!(plan_segments(1000, 0), vec![ByteRange::whole(1000)]);
        assert_eq!(plan_segments(0, 0), vec![ByteRange::whole(0)]);
    }

    #[test]
    fn empty_file_with_segment_size() {
        assert!(plan_segments(0, 4).is_empty());
    }

    #[test]
    fn count_is_ceiling_over_many_sizes() {
        for size in [1u64, 7, 64, 100, 4097, 65_536] {
            for seg in [1u64, 3, 64, 1000] {
                let ranges = plan_segments(size, seg);
                assert_eq!(ranges.len() as u64, size.div_ceil(seg), "n={size} s={seg}");
                assert_covers(&ranges, size);
                let k = ranges.len() as u64;
                assert_eq!(ranges.last().unwrap().len(), size - seg * (k - 1));
            }
        }
    }

    #[test]
    fn range_serializes_as_struct() {
        let json = serde_json::to_string(&ByteRange::new(4, 8)).unwrap();
        assert_eq!(json, r#"{"start":4,"end":8}"#);
    }
}
