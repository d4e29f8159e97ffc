use super::pad_data_group::PadDataGroup;
use crate::mot::mot_entities::MotEntity;
use crate::mot::mot_processor::MotProcessor;
use crate::msc::msc_data_group::parse_msc_data_group;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitLength,
    WaitStart,
    ReadData,
}

/// Reconstructs MSC data groups carried over XPAD and feeds them to the
/// MOT processor.
///
/// The required group length arrives separately through the data group
/// length indicator; a start field without a known length is skipped until
/// the next announcement.
pub struct PadMotProcessor {
    data_group: PadDataGroup,
    state: State,
    mot_processor: MotProcessor,
    completed_entities: Vec<MotEntity>,
    pub total_groups: u32,
    pub total_crc_errors: u32,
    pub total_conditional_access_groups: u32,
}

impl Default for PadMotProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PadMotProcessor {
    pub fn new() -> Self {
        Self {
            data_group: PadDataGroup::new(),
            state: State::WaitLength,
            mot_processor: MotProcessor::default(),
            completed_entities: Vec::new(),
            total_groups: 0,
            total_crc_errors: 0,
            total_conditional_access_groups: 0,
        }
    }

    pub fn mot_processor(&mut self) -> &mut MotProcessor {
        &mut self.mot_processor
    }

    /// Entities completed since the last call.
    pub fn take_completed_entities(&mut self) -> Vec<MotEntity> {
        std::mem::take(&mut self.completed_entities)
    }

    /// Announces the total length of the next data group, from the data
    /// group length indicator.
    pub fn set_group_length(&mut self, length: u16) {
        if length == 0 {
            return;
        }
        self.data_group.reset();
        if !self.data_group.set_required_bytes(length as usize) {
            self.state = State::WaitLength;
            return;
        }
        self.state = State::WaitStart;
    }

    pub fn process_xpad(&mut self, is_start: bool, is_conditional_access: bool, buf: &[u8]) {
        // Conditional access groups are not decoded
        if is_conditional_access {
            if is_start {
                self.total_conditional_access_groups += 1;
            }
            return;
        }

        let mut curr_byte = 0;
        let mut curr_is_start = is_start;
        while curr_byte < buf.len() {
            let nb_read = self.consume(curr_is_start, &buf[curr_byte..]);
            curr_byte += nb_read;
            curr_is_start = false;
        }
    }

    fn consume(&mut self, is_start: bool, buf: &[u8]) -> usize {
        match self.state {
            State::WaitLength => buf.len(),
            State::WaitStart => {
                if !is_start {
                    return buf.len();
                }
                self.state = State::ReadData;
                self.consume_data(buf)
            }
            State::ReadData => {
                if is_start {
                    // A new group starts before the previous one finished
                    log::info!(
                        target: "pad-mot-processor",
                        "discarding partial data group {}/{}",
                        self.data_group.current_bytes(), self.data_group.required_bytes(),
                    );
                    self.state = State::WaitLength;
                    return buf.len();
                }
                self.consume_data(buf)
            }
        }
    }

    fn consume_data(&mut self, buf: &[u8]) -> usize {
        let nb_read = self.data_group.consume(buf);
        if !self.data_group.is_complete() {
            return nb_read;
        }

        self.total_groups += 1;
        self.interpret();
        self.data_group.reset();
        self.state = State::WaitLength;
        nb_read
    }

    fn interpret(&mut self) {
        match parse_msc_data_group(self.data_group.data()) {
            Ok(group) => {
                if let Some(entity) = self.mot_processor.process_data_group(&group) {
                    self.completed_entities.push(entity);
                }
            }
            Err(error) => {
                self.total_crc_errors += 1;
                log::warn!(target: "pad-mot-processor", "invalid MSC data group: {}", error);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mot::mot_processor::test_support::{make_mot_header, make_segments};
    use crate::msc::msc_data_group::test_support::make_mot_data_group;

    fn feed_group(processor: &mut PadMotProcessor, group: &[u8]) {
        processor.set_group_length(group.len() as u16);
        // Deliver in XPAD sized chunks
        for (i, chunk) in group.chunks(16).enumerate() {
            processor.process_xpad(i == 0, false, chunk);
        }
    }

    #[test]
    fn mot_entity_arrives_through_the_xpad_path() {
        let mut processor = PadMotProcessor::new();

        let body: Vec<u8> = (0u8..64).map(|i| i ^ 0x5A).collect();
        let header = make_mot_header(64, 2, 1, "xpad.jpg");

        let header_segment = &make_segments(&header, header.len())[0];
        let group = make_mot_data_group(3, 0, 0x1001, 0, true, header_segment);
        feed_group(&mut processor, &group);

        for (index, segment) in make_segments(&body, 32).iter().enumerate() {
            let is_last = index == 1;
            let group = make_mot_data_group(4, 1, 0x1001, index as u16, is_last, segment);
            feed_group(&mut processor, &group);
        }

        let entities = processor.take_completed_entities();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].body, body);
        assert_eq!(entities[0].header.content_name.name, "xpad.jpg");
        assert!(processor.take_completed_entities().is_empty());
    }

    #[test]
    fn data_without_announced_length_is_skipped() {
        let mut processor = PadMotProcessor::new();
        processor.process_xpad(true, false, &[1, 2, 3, 4]);
        assert_eq!(processor.total_groups, 0);
    }

    #[test]
    fn conditional_access_groups_are_counted_not_decoded() {
        let mut processor = PadMotProcessor::new();
        processor.set_group_length(8);
        processor.process_xpad(true, true, &[1, 2, 3, 4]);
        assert_eq!(processor.total_conditional_access_groups, 1);
        assert_eq!(processor.total_groups, 0);
    }

    #[test]
    fn oversized_group_length_is_rejected() {
        let mut processor = PadMotProcessor::new();
        processor.set_group_length(u16::MAX);
        processor.process_xpad(true, false, &[0u8; 64]);
        assert_eq!(processor.total_groups, 0);
    }
}
