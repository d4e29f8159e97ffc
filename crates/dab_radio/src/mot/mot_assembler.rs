/// Upper bound on segment numbers, a guard against absurd declarations.
pub const MAX_SEGMENTS: usize = 8192;

/// Collects the segments of one MOT entity component (header or body).
///
/// Segments arrive unordered and are stored per index; the last segment
/// flag fixes the total count. Once every index up to the total is present
/// the segments are linearised into the ordered buffer.
pub struct MotAssembler {
    segments: Vec<Option<Vec<u8>>>,
    total_segments: Option<usize>,
    nb_received: usize,
    ordered_buffer: Vec<u8>,
}

impl Default for MotAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl MotAssembler {
    pub fn new() -> Self {
        Self {
            segments: Vec::new(),
            total_segments: None,
            nb_received: 0,
            ordered_buffer: Vec::new(),
        }
    }

    pub fn reset(&mut self) {
        self.segments.clear();
        self.total_segments = None;
        self.nb_received = 0;
        self.ordered_buffer.clear();
    }

    /// Declares the total number of segments from a last segment flag.
    /// Conflicting declarations are rejected.
    pub fn set_total_segments(&mut self, total: usize) -> bool {
        if let Some(known) = self.total_segments {
            if known != total {
                log::warn!(
                    target: "mot-assembler",
                    "conflicting total segment count {} != {}", total, known,
                );
                return false;
            }
            return true;
        }
        self.total_segments = Some(total);
        true
    }

    /// Stores one segment. A segment index at or beyond the declared total
    /// is rejected without mutating the assembler.
    pub fn add_segment(&mut self, index: usize, data: &[u8]) -> bool {
        if index >= MAX_SEGMENTS {
            log::warn!(target: "mot-assembler", "segment index {} is out of range", index);
            return false;
        }
        if let Some(total) = self.total_segments {
            if index >= total {
                log::warn!(
                    target: "mot-assembler",
                    "segment index {} exceeds declared total {}", index, total,
                );
                return false;
            }
        }

        if index >= self.segments.len() {
            self.segments.resize_with(index + 1, || None);
        }
        match &self.segments[index] {
            Some(existing) => {
                if existing.as_slice() != data {
                    log::warn!(target: "mot-assembler", "segment {} content mismatch", index);
                }
            }
            None => {
                self.segments[index] = Some(data.to_vec());
                self.nb_received += 1;
            }
        }
        true
    }

    /// True once all declared segments are present; linearises the ordered
    /// buffer on the transition.
    pub fn check_complete(&mut self) -> bool {
        let Some(total) = self.total_segments else {
            return false;
        };
        if !self.ordered_buffer.is_empty() {
            return true;
        }
        if self.nb_received < total || self.segments.len() < total {
            return false;
        }
        let is_complete = self.segments.iter().take(total).all(|s| s.is_some());
        if !is_complete {
            return false;
        }
        for segment in self.segments.iter().take(total) {
            self.ordered_buffer
                .extend_from_slice(segment.as_ref().expect("all segments present"));
        }
        true
    }

    pub fn data(&self) -> &[u8] {
        &self.ordered_buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_out_of_order_segments() {
        let mut assembler = MotAssembler::new();
        for &index in &[2usize, 0, 3, 1] {
            let data = vec![index as u8; 32];
            assert!(assembler.add_segment(index, &data));
            if index == 3 {
                assert!(assembler.set_total_segments(4));
            }
            if index != 1 {
                assert!(!assembler.check_complete());
            }
        }
        assert!(assembler.check_complete());
        let expected: Vec<u8> = (0u8..4).flat_map(|i| vec![i; 32]).collect();
        assert_eq!(assembler.data(), &expected[..]);
    }

    #[test]
    fn rejects_segment_index_beyond_declared_total() {
        let mut assembler = MotAssembler::new();
        assembler.set_total_segments(2);
        assert!(assembler.add_segment(0, &[1]));
        assert!(!assembler.add_segment(2, &[2]));
        assert!(!assembler.add_segment(5, &[3]));
        // The rejected segments mutated nothing
        assert!(assembler.add_segment(1, &[4]));
        assert!(assembler.check_complete());
        assert_eq!(assembler.data(), &[1, 4]);
    }

    #[test]
    fn conflicting_total_is_rejected() {
        let mut assembler = MotAssembler::new();
        assert!(assembler.set_total_segments(3));
        assert!(!assembler.set_total_segments(5));
    }

    #[test]
    fn repeated_segment_is_idempotent() {
        let mut assembler = MotAssembler::new();
        assembler.set_total_segments(1);
        assert!(assembler.add_segment(0, &[7, 7]));
        assert!(assembler.add_segment(0, &[7, 7]));
        assert!(assembler.check_complete());
        assert_eq!(assembler.data(), &[7, 7]);
    }
}
