/// A dynamic label is 1 to 8 segments of at most 16 characters each.
pub const MAX_SEGMENTS: usize = 8;
pub const MAX_SEGMENT_BYTES: usize = 16;
pub const MAX_MESSAGE_BYTES: usize = MAX_SEGMENTS * MAX_SEGMENT_BYTES;

/// Reassembles dynamic label segments into the full label.
///
/// Segments arrive in any order and are repeated by the broadcaster; the
/// assembler only reports a change when the combined label differs from the
/// previous combination. Segment lengths are required to stay identical per
/// index between repetitions; a mismatching resend is rejected.
pub struct PadDynamicLabelAssembler {
    unordered_buf: Vec<u8>,
    ordered_buf: Vec<u8>,
    segment_lengths: [usize; MAX_SEGMENTS],
    charset: u8,
    nb_required_segments: usize,
    is_changed: bool,
}

impl Default for PadDynamicLabelAssembler {
    fn default() -> Self {
        Self::new()
    }
}

impl PadDynamicLabelAssembler {
    pub fn new() -> Self {
        let mut assembler = Self {
            unordered_buf: vec![0u8; MAX_MESSAGE_BYTES],
            ordered_buf: Vec::with_capacity(MAX_MESSAGE_BYTES),
            segment_lengths: [0; MAX_SEGMENTS],
            charset: 0,
            nb_required_segments: 0,
            is_changed: true,
        };
        assembler.reset();
        assembler
    }

    pub fn reset(&mut self) {
        self.charset = 0;
        self.nb_required_segments = 0;
        self.ordered_buf.clear();
        self.is_changed = true;
        self.segment_lengths = [0; MAX_SEGMENTS];
    }

    /// Stores one segment. Returns true when this update completed a new,
    /// different label which is then available through [`Self::label`].
    pub fn update_segment(&mut self, data: &[u8], segment_index: usize) -> bool {
        if segment_index >= MAX_SEGMENTS {
            log::warn!(
                target: "pad-dynamic-label",
                "segment index {} falls out of bounds [0,{}]", segment_index, MAX_SEGMENTS - 1,
            );
            return false;
        }
        if data.is_empty() || data.len() > MAX_SEGMENT_BYTES {
            log::warn!(
                target: "pad-dynamic-label",
                "segment length {} falls out of bounds [1,{}]", data.len(), MAX_SEGMENT_BYTES,
            );
            return false;
        }

        let known_length = self.segment_lengths[segment_index];
        if known_length != 0 && known_length != data.len() {
            // Strict per segment length agreement between repetitions
            log::warn!(
                target: "pad-dynamic-label",
                "segment {} has mismatching length {} != {}", segment_index, known_length, data.len(),
            );
            return false;
        }

        let offset = segment_index * MAX_SEGMENT_BYTES;
        let stored = &mut self.unordered_buf[offset..offset + data.len()];
        let content_changed = stored != data;
        stored.copy_from_slice(data);

        let length_changed = known_length == 0;
        self.segment_lengths[segment_index] = data.len();
        self.is_changed = self.is_changed || length_changed || content_changed;

        if self.is_changed && self.combine_segments() {
            self.is_changed = false;
            return true;
        }
        false
    }

    pub fn set_total_segments(&mut self, total_segments: usize) {
        if self.nb_required_segments != total_segments {
            self.is_changed = true;
        }
        self.nb_required_segments = total_segments;
    }

    pub fn set_charset(&mut self, charset: u8) {
        if self.charset != charset {
            self.is_changed = true;
        }
        self.charset = charset;
    }

    pub fn charset(&self) -> u8 {
        self.charset
    }

    pub fn is_completed(&self) -> bool {
        !self.ordered_buf.is_empty()
    }

    pub fn label(&self) -> &[u8] {
        &self.ordered_buf
    }

    fn combine_segments(&mut self) -> bool {
        if self.nb_required_segments == 0 {
            return false;
        }
        for &length in self.segment_lengths.iter().take(self.nb_required_segments) {
            if length == 0 {
                return false;
            }
        }

        self.ordered_buf.clear();
        for (index, &length) in self.segment_lengths.iter().take(self.nb_required_segments).enumerate() {
            let offset = index * MAX_SEGMENT_BYTES;
            self.ordered_buf.extend_from_slice(&self.unordered_buf[offset..offset + length]);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combines_out_of_order_segments() {
        let mut assembler = PadDynamicLabelAssembler::new();
        assembler.set_charset(0);
        assembler.set_total_segments(2);
        assert!(!assembler.update_segment(b" world", 1));
        assert!(assembler.update_segment(b"hello", 0));
        assert_eq!(assembler.label(), b"hello world");
    }

    #[test]
    fn repeating_an_identical_label_does_not_report_a_change() {
        let mut assembler = PadDynamicLabelAssembler::new();
        assembler.set_total_segments(2);
        assert!(!assembler.update_segment(b"now pla", 0));
        assert!(assembler.update_segment(b"ying...", 1));

        // The broadcaster repeats the same segments
        assembler.set_total_segments(2);
        assert!(!assembler.update_segment(b"now pla", 0));
        assert!(!assembler.update_segment(b"ying...", 1));
    }

    #[test]
    fn changed_content_reports_again() {
        let mut assembler = PadDynamicLabelAssembler::new();
        assembler.set_total_segments(1);
        assert!(assembler.update_segment(b"track one sixty", 0));
        assert!(assembler.update_segment(b"track two fifty", 0));
        assert_eq!(assembler.label(), b"track two fifty");
    }

    #[test]
    fn mismatching_repeat_length_is_rejected() {
        let mut assembler = PadDynamicLabelAssembler::new();
        assembler.set_total_segments(2);
        assert!(!assembler.update_segment(b"eight ch", 0));
        assert!(!assembler.update_segment(b"too long now", 0));
        // The stored segment is unchanged
        assert!(assembler.update_segment(b"ars here", 1));
        assert_eq!(assembler.label(), b"eight chars here");
    }

    #[test]
    fn out_of_range_segment_index_is_rejected() {
        let mut assembler = PadDynamicLabelAssembler::new();
        assembler.set_total_segments(8);
        assert!(!assembler.update_segment(b"overflow", MAX_SEGMENTS));
    }
}
