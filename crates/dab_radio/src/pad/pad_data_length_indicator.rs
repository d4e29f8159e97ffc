use super::pad_data_group::PadDataGroup;

/// The data group length indicator is itself a 4 byte MSC data group:
/// two length bytes and a checksum.
const TOTAL_DATA_GROUP_BYTES: usize = 4;

/// Collects XPAD type 1 fields announcing the length of the following MSC
/// data group.
pub struct PadDataLengthIndicator {
    data_group: PadDataGroup,
    is_length_available: bool,
    length: u16,
}

impl Default for PadDataLengthIndicator {
    fn default() -> Self {
        Self::new()
    }
}

impl PadDataLengthIndicator {
    pub fn new() -> Self {
        let mut data_group = PadDataGroup::new();
        data_group.set_required_bytes(TOTAL_DATA_GROUP_BYTES);
        Self {
            data_group,
            is_length_available: false,
            length: 0,
        }
    }

    pub fn reset_length(&mut self) {
        self.is_length_available = false;
        self.length = 0;
        self.data_group.reset();
        self.data_group.set_required_bytes(TOTAL_DATA_GROUP_BYTES);
    }

    pub fn is_length_available(&self) -> bool {
        self.is_length_available
    }

    pub fn length(&self) -> u16 {
        self.length
    }

    pub fn process_xpad(&mut self, buf: &[u8]) {
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            curr_byte += self.consume(&buf[curr_byte..]);
        }
    }

    fn consume(&mut self, buf: &[u8]) -> usize {
        let nb_read = self.data_group.consume(buf);
        if !self.data_group.is_complete() {
            return nb_read;
        }

        if !self.data_group.check_crc() {
            log::warn!(target: "pad-data-length", "CRC mismatch on data group");
            self.data_group.reset();
            self.data_group.set_required_bytes(TOTAL_DATA_GROUP_BYTES);
            return nb_read;
        }

        self.interpret();
        self.data_group.reset();
        self.data_group.set_required_bytes(TOTAL_DATA_GROUP_BYTES);
        nb_read
    }

    fn interpret(&mut self) {
        let buf = self.data_group.data();
        let length = (u16::from(buf[0] & 0b00111111) << 8) | u16::from(buf[1]);
        self.length = length;
        self.is_length_available = true;
    }
}

#[cfg(test)]
pub mod test_support {
    use dab_core::crc::Crc16;

    /// Builds the 4 byte length indicator data group for a declared length.
    pub fn make_length_indicator(length: u16) -> [u8; 4] {
        let mut buf = [0u8; 4];
        buf[0] = ((length >> 8) & 0b00111111) as u8;
        buf[1] = (length & 0xFF) as u8;
        let crc = Crc16::dab_ccitt().process(&buf[..2]);
        buf[2] = (crc >> 8) as u8;
        buf[3] = (crc & 0xFF) as u8;
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_length_indicator;
    use super::*;

    #[test]
    fn announces_the_declared_length() {
        let mut indicator = PadDataLengthIndicator::new();
        let group = make_length_indicator(542);
        indicator.process_xpad(&group);
        assert!(indicator.is_length_available());
        assert_eq!(indicator.length(), 542);
    }

    #[test]
    fn split_delivery_is_reassembled() {
        let mut indicator = PadDataLengthIndicator::new();
        let group = make_length_indicator(77);
        indicator.process_xpad(&group[..3]);
        assert!(!indicator.is_length_available());
        indicator.process_xpad(&group[3..]);
        assert!(indicator.is_length_available());
        assert_eq!(indicator.length(), 77);
    }

    #[test]
    fn corrupted_indicator_is_discarded() {
        let mut indicator = PadDataLengthIndicator::new();
        let mut group = make_length_indicator(100);
        group[1] ^= 0x01;
        indicator.process_xpad(&group);
        assert!(!indicator.is_length_available());
    }
}
