//! Extraction of programme associated data from AAC access units.
//!
//! The PAD travels in a data_stream_element at the start of the raw data
//! block; the FPAD occupies the last two bytes of that element with the
//! XPAD before it. Access units without a data stream element still drive
//! the PAD layer with an empty FPAD so its state machines observe the gap.

/// PAD bytes pulled out of one access unit. The XPAD is still in reversed
/// transmission byte order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedPad {
    pub fpad: [u8; 2],
    pub xpad: Vec<u8>,
}

impl Default for ExtractedPad {
    fn default() -> Self {
        Self { fpad: [0, 0], xpad: Vec::new() }
    }
}

const SYNTAX_DATA_STREAM_ELEMENT: u8 = 4;

#[derive(Default)]
pub struct AacDataDecoder {
    pub total_access_units: u32,
    pub total_without_pad: u32,
    pub total_malformed: u32,
}

impl AacDataDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scans an access unit for its data stream element and extracts the
    /// PAD. Returns the empty default when the unit carries none.
    pub fn process_access_unit(&mut self, data: &[u8]) -> ExtractedPad {
        self.total_access_units += 1;
        match self.parse_data_stream_element(data) {
            Some(pad) => pad,
            None => {
                self.total_without_pad += 1;
                ExtractedPad::default()
            }
        }
    }

    fn parse_data_stream_element(&mut self, data: &[u8]) -> Option<ExtractedPad> {
        if data.len() < 2 {
            return None;
        }
        let header = data[0];
        let data_type = (header & 0b11100000) >> 5;
        if data_type != SYNTAX_DATA_STREAM_ELEMENT {
            return None;
        }

        let mut curr_byte = 1;
        let mut length = usize::from(data[curr_byte]);
        curr_byte += 1;
        if length == 255 {
            if data.len() < 3 {
                self.total_malformed += 1;
                return None;
            }
            length += usize::from(data[curr_byte]);
            curr_byte += 1;
        }

        let nb_remain = data.len() - curr_byte;
        if length > nb_remain {
            log::warn!(
                target: "aac-data-decoder",
                "data stream element size too large {} > {}", length, nb_remain,
            );
            self.total_malformed += 1;
            return None;
        }
        let nb_fpad_bytes = 2;
        if length < nb_fpad_bytes {
            self.total_malformed += 1;
            return None;
        }

        // FPAD is placed at the end of the data stream element
        let element = &data[curr_byte..curr_byte + length];
        let nb_xpad_bytes = length - nb_fpad_bytes;
        Some(ExtractedPad {
            fpad: [element[nb_xpad_bytes], element[nb_xpad_bytes + 1]],
            xpad: element[..nb_xpad_bytes].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_access_unit(xpad: &[u8], fpad: [u8; 2]) -> Vec<u8> {
        let mut data = vec![SYNTAX_DATA_STREAM_ELEMENT << 5];
        data.push((xpad.len() + 2) as u8);
        data.extend_from_slice(xpad);
        data.extend_from_slice(&fpad);
        data.extend_from_slice(&[0xDE, 0xAD]); // trailing audio payload
        data
    }

    #[test]
    fn extracts_fpad_and_reversed_xpad() {
        let mut decoder = AacDataDecoder::new();
        let au = make_access_unit(&[1, 2, 3, 4], [0x40, 0x02]);
        let pad = decoder.process_access_unit(&au);
        assert_eq!(pad.fpad, [0x40, 0x02]);
        assert_eq!(pad.xpad, vec![1, 2, 3, 4]);
    }

    #[test]
    fn missing_data_stream_element_yields_empty_pad() {
        let mut decoder = AacDataDecoder::new();
        let pad = decoder.process_access_unit(&[0x01, 0x02, 0x03]);
        assert_eq!(pad, ExtractedPad::default());
        assert_eq!(decoder.total_without_pad, 1);
    }

    #[test]
    fn escaped_length_is_honoured() {
        let mut decoder = AacDataDecoder::new();
        let xpad = vec![7u8; 260];
        let mut data = vec![SYNTAX_DATA_STREAM_ELEMENT << 5, 255, (260 + 2 - 255) as u8];
        data.extend_from_slice(&xpad);
        data.extend_from_slice(&[0xAA, 0xBB]);
        let pad = decoder.process_access_unit(&data);
        assert_eq!(pad.fpad, [0xAA, 0xBB]);
        assert_eq!(pad.xpad.len(), 260);
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut decoder = AacDataDecoder::new();
        let data = [SYNTAX_DATA_STREAM_ELEMENT << 5, 200, 1, 2, 3];
        let pad = decoder.process_access_unit(&data);
        assert_eq!(pad, ExtractedPad::default());
        assert_eq!(decoder.total_malformed, 1);
    }
}
