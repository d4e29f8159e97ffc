use super::pad_data_length_indicator::PadDataLengthIndicator;
use super::pad_dynamic_label::PadDynamicLabel;
use super::pad_mot_processor::PadMotProcessor;

const MAX_XPAD_BYTES: usize = 196;
const MAX_CI_LENGTH: usize = 4;

// Clause 7.4.4.2 - Contents indicator in variable size X-PAD
// The length index selects from this table of XPAD data field lengths
const CONTENT_INDICATOR_LENGTH_TABLE: [usize; 8] = [4, 6, 8, 12, 16, 24, 32, 48];

const APP_TYPE_DATA_GROUP_LENGTH: u8 = 1;
const APP_TYPE_LABEL_START: u8 = 2;
const APP_TYPE_LABEL_CONTINUATION: u8 = 3;
const APP_TYPE_MOT_START: u8 = 12;
const APP_TYPE_MOT_CONTINUATION: u8 = 13;
const APP_TYPE_MOT_CA_START: u8 = 14;
const APP_TYPE_MOT_CA_CONTINUATION: u8 = 15;

#[derive(Debug, Clone, Copy, Default)]
struct ContentIndicator {
    length: usize,
    app_type: u8,
}

/// Top of the programme associated data pipeline.
///
/// Splits each XPAD field along its contents indicator list and routes the
/// data subfields to the dynamic label, data group length indicator and MOT
/// reassembly applications. The CI list persists across access units since
/// broadcasters omit it on continuation fields; a NULL XPAD preserves it.
pub struct PadProcessor {
    ci_list: [ContentIndicator; MAX_CI_LENGTH],
    ci_list_length: usize,
    xpad_unreversed: Vec<u8>,
    previous_mot_length: u16,
    dynamic_label: PadDynamicLabel,
    data_length_indicator: PadDataLengthIndicator,
    mot: PadMotProcessor,
    pub total_fpad_errors: u32,
    pub total_unknown_app_types: u32,
}

impl Default for PadProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl PadProcessor {
    pub fn new() -> Self {
        Self {
            ci_list: [ContentIndicator::default(); MAX_CI_LENGTH],
            ci_list_length: 0,
            xpad_unreversed: Vec::with_capacity(MAX_XPAD_BYTES),
            previous_mot_length: 0,
            dynamic_label: PadDynamicLabel::new(),
            data_length_indicator: PadDataLengthIndicator::new(),
            mot: PadMotProcessor::new(),
            total_fpad_errors: 0,
            total_unknown_app_types: 0,
        }
    }

    pub fn dynamic_label(&mut self) -> &mut PadDynamicLabel {
        &mut self.dynamic_label
    }

    pub fn mot(&mut self) -> &mut PadMotProcessor {
        &mut self.mot
    }

    /// Consumes the PAD of one access unit. The XPAD is passed in reversed
    /// transmission byte order; an empty XPAD leaves all state untouched so
    /// broadcasters that skip intermediate fields keep working.
    pub fn process(&mut self, fpad: &[u8; 2], xpad_reversed: &[u8]) {
        // An access unit without any XPAD, keep the CI list
        if xpad_reversed.is_empty() {
            return;
        }

        // Clause 7.4.1: Coding of F-PAD
        let fpad_type = (fpad[0] & 0b11000000) >> 6;
        let fpad_byte_l0 = fpad[0] & 0b00111111;
        let fpad_ci_flag = (fpad[1] & 0b00000010) >> 1;

        if fpad_type != 0b00 {
            self.total_fpad_errors += 1;
            log::warn!(target: "pad-processor", "FPAD type {} reserved for future use", fpad_type);
            return;
        }

        let xpad_indicator = (fpad_byte_l0 & 0b00110000) >> 4;
        if xpad_reversed.len() > MAX_XPAD_BYTES {
            self.total_fpad_errors += 1;
            log::warn!(
                target: "pad-processor",
                "XPAD of {} bytes exceeds the {} byte limit", xpad_reversed.len(), MAX_XPAD_BYTES,
            );
            return;
        }

        // Clause 7.4.2.0: the byte order of the XPAD is reversed before
        // transmission, the bit order is preserved
        self.xpad_unreversed.clear();
        self.xpad_unreversed.extend(xpad_reversed.iter().rev());

        let has_indicator_list = fpad_ci_flag != 0;
        match xpad_indicator {
            // No XPAD field announced: a populated buffer is inconsistent
            0b00 => {
                self.total_fpad_errors += 1;
                log::warn!(
                    target: "pad-processor",
                    "XPAD indicator announces no data but {} bytes arrived", xpad_reversed.len(),
                );
            }
            0b01 => self.process_short_xpad(has_indicator_list),
            0b10 => self.process_variable_xpad(has_indicator_list),
            _ => {
                self.total_fpad_errors += 1;
                log::warn!(target: "pad-processor", "reserved XPAD indicator");
            }
        }
    }

    // Clause 7.4.2.1 - Short XPAD: 4 bytes, either 1 byte CI plus 3 bytes
    // of data or 4 bytes of data
    fn process_short_xpad(&mut self, has_indicator_list: bool) {
        const DATA_BYTES_WITH_CI: usize = 3;
        const DATA_BYTES_WITHOUT_CI: usize = 4;

        let mut curr_byte = 0;
        if has_indicator_list {
            if self.xpad_unreversed.is_empty() {
                log::warn!(target: "pad-processor", "short XPAD too small for its indicator");
                return;
            }
            let app_type = self.xpad_unreversed[curr_byte] & 0b00011111;
            curr_byte += 1;
            self.ci_list[0] = ContentIndicator { length: DATA_BYTES_WITH_CI, app_type };
            self.ci_list_length = 1;
        }

        if self.ci_list_length == 0 {
            log::debug!(target: "pad-processor", "short XPAD before any contents indicator");
            return;
        }
        if self.ci_list_length != 1 {
            log::warn!(
                target: "pad-processor",
                "short XPAD with a contents indicator list of {}", self.ci_list_length,
            );
            self.ci_list_length = 0;
            return;
        }

        self.process_data_field(curr_byte);
        // Following short XPAD fields carry no contents indicator
        self.ci_list[0].length = DATA_BYTES_WITHOUT_CI;
    }

    // Clause 7.4.2: Variable size XPAD with up to four CI bytes
    fn process_variable_xpad(&mut self, has_indicator_list: bool) {
        let mut curr_byte = 0;
        if has_indicator_list {
            self.ci_list_length = 0;
            for _ in 0..MAX_CI_LENGTH {
                if curr_byte >= self.xpad_unreversed.len() {
                    break;
                }
                let ci = self.xpad_unreversed[curr_byte];
                curr_byte += 1;

                let length_index = ((ci & 0b11100000) >> 5) as usize;
                let app_type = ci & 0b00011111;
                // App type 0 terminates the list
                if app_type == 0 {
                    break;
                }
                let length = CONTENT_INDICATOR_LENGTH_TABLE[length_index];
                self.ci_list[self.ci_list_length] = ContentIndicator { length, app_type };
                self.ci_list_length += 1;
            }
        }
        self.process_data_field(curr_byte);
    }

    fn process_data_field(&mut self, start_byte: usize) {
        let mut curr_byte = start_byte;
        for i in 0..self.ci_list_length {
            let content = self.ci_list[i];
            let nb_remain = self.xpad_unreversed.len() - curr_byte;
            if content.length > nb_remain {
                log::debug!(
                    target: "pad-processor",
                    "insufficient data field {}/{} at indicator {}/{}",
                    content.length, nb_remain, i, self.ci_list_length,
                );
                return;
            }
            let subfield: Vec<u8> =
                self.xpad_unreversed[curr_byte..curr_byte + content.length].to_vec();
            curr_byte += content.length;

            // Clause 7.4.5.1: the data group length indicator announces the
            // size of the MSC data group sent through the MOT app types.
            // An interrupted indicator group is reset so padding from other
            // subfields cannot corrupt the length.
            let current_mot_length = self.previous_mot_length;
            self.previous_mot_length = 0;
            if content.app_type != APP_TYPE_DATA_GROUP_LENGTH {
                self.data_length_indicator.reset_length();
            }

            // Start app types rewrite themselves to their continuation type
            // so later fields without a CI parse correctly
            match content.app_type {
                APP_TYPE_DATA_GROUP_LENGTH => {
                    self.data_length_indicator.process_xpad(&subfield);
                    if self.data_length_indicator.is_length_available() {
                        self.previous_mot_length = self.data_length_indicator.length();
                        self.data_length_indicator.reset_length();
                    }
                }
                APP_TYPE_LABEL_START => {
                    self.ci_list[i].app_type = APP_TYPE_LABEL_CONTINUATION;
                    self.dynamic_label.process_xpad(true, &subfield);
                }
                APP_TYPE_LABEL_CONTINUATION => {
                    self.dynamic_label.process_xpad(false, &subfield);
                }
                APP_TYPE_MOT_START => {
                    self.ci_list[i].app_type = APP_TYPE_MOT_CONTINUATION;
                    self.mot.set_group_length(current_mot_length);
                    self.mot.process_xpad(true, false, &subfield);
                }
                APP_TYPE_MOT_CONTINUATION => {
                    self.mot.process_xpad(false, false, &subfield);
                }
                APP_TYPE_MOT_CA_START => {
                    self.ci_list[i].app_type = APP_TYPE_MOT_CA_CONTINUATION;
                    self.mot.set_group_length(current_mot_length);
                    self.mot.process_xpad(true, true, &subfield);
                }
                APP_TYPE_MOT_CA_CONTINUATION => {
                    self.mot.process_xpad(false, true, &subfield);
                }
                app_type => {
                    self.total_unknown_app_types += 1;
                    log::debug!(
                        target: "pad-processor",
                        "unsupported app_type={} length={}", app_type, content.length,
                    );
                }
            }
        }
        // Broadcasters commonly pad unused capacity with NULL bytes, so an
        // unconsumed remainder is not an error
    }
}
