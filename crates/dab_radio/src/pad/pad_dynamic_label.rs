use super::pad_data_group::PadDataGroup;
use super::pad_dynamic_label_assembler::PadDynamicLabelAssembler;
use radio_utils::observable::Observable;

const TOTAL_CRC16_BYTES: usize = 2;
const TOTAL_HEADER_BYTES: usize = 2;
const MIN_DATA_GROUP_BYTES: usize = TOTAL_CRC16_BYTES + TOTAL_HEADER_BYTES;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    WaitStart,
    ReadLength,
    ReadData,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupType {
    LabelSegment,
    Command,
}

/// Commands carried by dynamic label control groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DynamicLabelCommand {
    ClearDisplay,
}

/// A complete dynamic label and the charset it was announced with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicLabelChange {
    pub label: Vec<u8>,
    pub charset: u8,
}

/// Reassembles dynamic label data groups from XPAD fields and interprets
/// label segments and command groups.
pub struct PadDynamicLabel {
    data_group: PadDataGroup,
    state: State,
    group_type: GroupType,
    assembler: PadDynamicLabelAssembler,
    previous_toggle_flag: u8,
    obs_on_label_change: Observable<DynamicLabelChange>,
    obs_on_command: Observable<DynamicLabelCommand>,
    pub total_crc_errors: u32,
    pub total_discarded_groups: u32,
}

impl Default for PadDynamicLabel {
    fn default() -> Self {
        Self::new()
    }
}

impl PadDynamicLabel {
    pub fn new() -> Self {
        let mut data_group = PadDataGroup::new();
        data_group.set_required_bytes(MIN_DATA_GROUP_BYTES);
        Self {
            data_group,
            state: State::WaitStart,
            group_type: GroupType::LabelSegment,
            assembler: PadDynamicLabelAssembler::new(),
            previous_toggle_flag: 0,
            obs_on_label_change: Observable::new(),
            obs_on_command: Observable::new(),
            total_crc_errors: 0,
            total_discarded_groups: 0,
        }
    }

    pub fn on_label_change(&mut self) -> &mut Observable<DynamicLabelChange> {
        &mut self.obs_on_label_change
    }

    pub fn on_command(&mut self) -> &mut Observable<DynamicLabelCommand> {
        &mut self.obs_on_command
    }

    pub fn process_xpad(&mut self, is_start: bool, buf: &[u8]) {
        let mut curr_byte = 0;
        let mut curr_is_start = is_start;
        while curr_byte < buf.len() {
            let nb_read = self.consume(curr_is_start, &buf[curr_byte..]);
            curr_byte += nb_read;
            curr_is_start = false;
        }
    }

    fn consume(&mut self, is_start: bool, buf: &[u8]) -> usize {
        if self.state == State::WaitStart && !is_start {
            return buf.len();
        }

        if is_start {
            if self.state != State::WaitStart && !self.data_group.is_complete() {
                self.total_discarded_groups += 1;
                log::info!(
                    target: "pad-dynamic-label",
                    "discarding partial data group {}/{}",
                    self.data_group.current_bytes(), self.data_group.required_bytes(),
                );
            }
            self.restart_data_group();
            self.state = State::ReadLength;
        }

        let mut nb_read_bytes = 0;

        // Don't read past the header field since the length comes from it
        if self.state == State::ReadLength {
            let nb_remain_header_bytes =
                TOTAL_HEADER_BYTES.saturating_sub(self.data_group.current_bytes());
            if nb_remain_header_bytes > 0 {
                let nb_take = nb_remain_header_bytes.min(buf.len());
                nb_read_bytes += self.data_group.consume(&buf[..nb_take]);
            }
            if self.data_group.current_bytes() >= TOTAL_HEADER_BYTES {
                self.read_group_header();
                self.state = State::ReadData;
            }
        }

        if self.state != State::ReadData {
            return nb_read_bytes;
        }

        nb_read_bytes += self.data_group.consume(&buf[nb_read_bytes..]);
        if !self.data_group.is_complete() {
            return nb_read_bytes;
        }

        if !self.data_group.check_crc() {
            self.total_crc_errors += 1;
            log::warn!(target: "pad-dynamic-label", "CRC mismatch on data group");
            self.state = State::WaitStart;
            self.restart_data_group();
            return nb_read_bytes;
        }

        match self.group_type {
            GroupType::LabelSegment => self.interpret_label_segment(),
            GroupType::Command => self.interpret_command(),
        }

        self.state = State::WaitStart;
        self.restart_data_group();
        nb_read_bytes
    }

    fn restart_data_group(&mut self) {
        self.data_group.reset();
        self.data_group.set_required_bytes(MIN_DATA_GROUP_BYTES);
    }

    fn read_group_header(&mut self) {
        let buf = self.data_group.data();
        let toggle_flag = (buf[0] & 0b10000000) >> 7;
        let is_command = (buf[0] & 0b00010000) != 0;

        if is_command {
            // Command groups have no data field
            self.data_group.set_required_bytes(TOTAL_HEADER_BYTES + TOTAL_CRC16_BYTES);
            self.group_type = GroupType::Command;
        } else {
            let length = (buf[0] & 0b00001111) as usize;
            let nb_data_group_bytes = TOTAL_HEADER_BYTES + TOTAL_CRC16_BYTES + length + 1;
            self.data_group.set_required_bytes(nb_data_group_bytes);
            self.group_type = GroupType::LabelSegment;

            // A flipped toggle announces a different dynamic label
            if toggle_flag != self.previous_toggle_flag {
                self.previous_toggle_flag = toggle_flag;
                self.assembler.reset();
            }
        }
    }

    fn interpret_label_segment(&mut self) {
        let buf = self.data_group.data();
        let total_bytes = self.data_group.required_bytes();

        let first_last_flag = (buf[0] & 0b01100000) >> 5;
        let field2 = (buf[1] & 0b11110000) >> 4;

        let is_first = (first_last_flag & 0b10) != 0;
        let is_last = (first_last_flag & 0b01) != 0;

        let mut segment_number = 0usize;
        if !is_first {
            segment_number = (field2 & 0b0111) as usize;
        }
        if is_last {
            self.assembler.set_total_segments(segment_number + 1);
        }
        if is_first {
            self.assembler.set_charset(field2);
        }

        let data = &buf[TOTAL_HEADER_BYTES..total_bytes - TOTAL_CRC16_BYTES];
        let is_changed = self.assembler.update_segment(data, segment_number);
        if !is_changed {
            return;
        }

        let change = DynamicLabelChange {
            label: self.assembler.label().to_vec(),
            charset: self.assembler.charset(),
        };
        log::info!(
            target: "pad-dynamic-label",
            "label[{}]={}", change.label.len(), String::from_utf8_lossy(&change.label),
        );
        self.obs_on_label_change.notify(&change);
    }

    fn interpret_command(&mut self) {
        let buf = self.data_group.data();
        let command = buf[0] & 0b00001111;
        match command {
            0b0000 => {
                log::info!(target: "pad-dynamic-label", "command=clear_display");
                self.obs_on_command.notify(&DynamicLabelCommand::ClearDisplay);
            }
            // Dynamic label plus carries its own protocol, only acknowledged
            0b1000 => {
                log::info!(target: "pad-dynamic-label", "command=dynamic_label_plus");
            }
            command => {
                log::warn!(
                    target: "pad-dynamic-label",
                    "command code {} reserved for future use", command,
                );
            }
        }
    }
}

#[cfg(test)]
pub mod test_support {
    use dab_core::crc::Crc16;

    /// Builds one dynamic label segment data group.
    pub fn make_label_segment(
        toggle: bool,
        is_first: bool,
        is_last: bool,
        segment_number: u8,
        charset: u8,
        text: &[u8],
    ) -> Vec<u8> {
        assert!(!text.is_empty() && text.len() <= 16);
        let mut header0 = ((text.len() - 1) & 0x0F) as u8;
        if toggle {
            header0 |= 0b10000000;
        }
        if is_first {
            header0 |= 0b01000000;
        }
        if is_last {
            header0 |= 0b00100000;
        }
        let field2 = if is_first { charset } else { segment_number & 0b0111 };

        let mut buf = vec![header0, field2 << 4];
        buf.extend_from_slice(text);
        let crc = Crc16::dab_ccitt().process(&buf);
        buf.push((crc >> 8) as u8);
        buf.push((crc & 0xFF) as u8);
        buf
    }

    /// Builds a dynamic label command data group.
    pub fn make_command_group(toggle: bool, command: u8) -> Vec<u8> {
        let mut header0 = 0b00010000 | (command & 0x0F);
        if toggle {
            header0 |= 0b10000000;
        }
        let mut buf = vec![header0, 0x00];
        let crc = Crc16::dab_ccitt().process(&buf);
        buf.push((crc >> 8) as u8);
        buf.push((crc & 0xFF) as u8);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    fn collect_labels(label: &mut PadDynamicLabel) -> Arc<Mutex<Vec<String>>> {
        let labels = Arc::new(Mutex::new(Vec::new()));
        label.on_label_change().subscribe({
            let labels = labels.clone();
            move |change| {
                labels
                    .lock()
                    .unwrap()
                    .push(String::from_utf8_lossy(&change.label).into_owned());
            }
        });
        labels
    }

    #[test]
    fn single_segment_label_is_emitted_once() {
        let mut label = PadDynamicLabel::new();
        let labels = collect_labels(&mut label);

        let segment = make_label_segment(false, true, true, 0, 0, b"Hello DAB");
        label.process_xpad(true, &segment);
        label.process_xpad(true, &segment);
        assert_eq!(*labels.lock().unwrap(), vec!["Hello DAB".to_string()]);
    }

    #[test]
    fn multi_segment_label_assembles_across_xpad_fields() {
        let mut label = PadDynamicLabel::new();
        let labels = collect_labels(&mut label);

        let seg0 = make_label_segment(false, true, false, 0, 0, b"The Midnight - ");
        let seg1 = make_label_segment(false, false, true, 1, 0, b"Days of Thunder");
        // Segments split over several fields of 8 bytes
        for (i, chunk) in seg0.chunks(8).enumerate() {
            label.process_xpad(i == 0, chunk);
        }
        for (i, chunk) in seg1.chunks(8).enumerate() {
            label.process_xpad(i == 0, chunk);
        }
        assert_eq!(
            *labels.lock().unwrap(),
            vec!["The Midnight - Days of Thunder".to_string()]
        );
    }

    #[test]
    fn toggle_flip_resets_the_assembler() {
        let mut label = PadDynamicLabel::new();
        let labels = collect_labels(&mut label);

        let first = make_label_segment(false, true, true, 0, 0, b"first track");
        label.process_xpad(true, &first);
        let second = make_label_segment(true, true, true, 0, 0, b"other track");
        label.process_xpad(true, &second);
        assert_eq!(
            *labels.lock().unwrap(),
            vec!["first track".to_string(), "other track".to_string()]
        );
    }

    #[test]
    fn command_group_notifies_clear_display() {
        let mut label = PadDynamicLabel::new();
        let clears = Arc::new(AtomicU32::new(0));
        label.on_command().subscribe({
            let clears = clears.clone();
            move |command| {
                assert_eq!(*command, DynamicLabelCommand::ClearDisplay);
                clears.fetch_add(1, Ordering::SeqCst);
            }
        });

        let group = make_command_group(false, 0);
        label.process_xpad(true, &group);
        assert_eq!(clears.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn corrupted_group_is_dropped() {
        let mut label = PadDynamicLabel::new();
        let labels = collect_labels(&mut label);
        let mut segment = make_label_segment(false, true, true, 0, 0, b"valid text");
        segment[3] ^= 0xFF;
        label.process_xpad(true, &segment);
        assert!(labels.lock().unwrap().is_empty());
        assert_eq!(label.total_crc_errors, 1);
    }
}
