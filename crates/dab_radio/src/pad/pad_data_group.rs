use dab_core::crc::Crc16;

/// Largest data group any XPAD application may declare.
pub const MAX_DATA_GROUP_BYTES: usize = 16384;

/// Accumulates the bytes of one PAD data group up to a declared length.
///
/// XPAD applications deliver their data groups scattered over several XPAD
/// fields; this buffer reassembles them and validates the trailing checksum
/// once complete.
#[derive(Default)]
pub struct PadDataGroup {
    buffer: Vec<u8>,
    nb_required_bytes: usize,
}

impl PadDataGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the total group length. Lengths beyond
    /// [`MAX_DATA_GROUP_BYTES`] are rejected as invalid.
    pub fn set_required_bytes(&mut self, nb_bytes: usize) -> bool {
        if nb_bytes > MAX_DATA_GROUP_BYTES {
            log::error!(
                target: "pad-data-group",
                "declared data group length {} exceeds the {} byte limit",
                nb_bytes, MAX_DATA_GROUP_BYTES,
            );
            return false;
        }
        self.nb_required_bytes = nb_bytes;
        true
    }

    pub fn reset(&mut self) {
        self.nb_required_bytes = 0;
        self.buffer.clear();
    }

    /// Appends bytes up to the declared length, returning how many were
    /// consumed.
    pub fn consume(&mut self, data: &[u8]) -> usize {
        let nb_remain = self.nb_required_bytes - self.buffer.len();
        let nb_read = data.len().min(nb_remain);
        self.buffer.extend_from_slice(&data[..nb_read]);
        nb_read
    }

    pub fn current_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn required_bytes(&self) -> usize {
        self.nb_required_bytes
    }

    pub fn is_complete(&self) -> bool {
        self.nb_required_bytes > 0 && self.buffer.len() == self.nb_required_bytes
    }

    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    /// Validates the checksum over everything before the two trailer bytes.
    pub fn check_crc(&self) -> bool {
        Crc16::dab_ccitt().validate_trailing(&self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consumes_up_to_the_declared_length() {
        let mut group = PadDataGroup::new();
        assert!(group.set_required_bytes(6));
        assert_eq!(group.consume(&[1, 2, 3, 4]), 4);
        assert!(!group.is_complete());
        assert_eq!(group.consume(&[5, 6, 7, 8]), 2);
        assert!(group.is_complete());
        assert_eq!(group.data(), &[1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn oversized_declared_length_is_rejected() {
        let mut group = PadDataGroup::new();
        assert!(!group.set_required_bytes(MAX_DATA_GROUP_BYTES + 1));
        assert_eq!(group.required_bytes(), 0);
        assert!(group.set_required_bytes(MAX_DATA_GROUP_BYTES));
    }

    #[test]
    fn crc_round_trip() {
        let payload = b"data group";
        let crc = Crc16::dab_ccitt().process(payload);
        let mut buf = payload.to_vec();
        buf.push((crc >> 8) as u8);
        buf.push((crc & 0xFF) as u8);

        let mut group = PadDataGroup::new();
        group.set_required_bytes(buf.len());
        group.consume(&buf);
        assert!(group.is_complete());
        assert!(group.check_crc());
    }
}
