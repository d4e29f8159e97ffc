//! MSC data group level parsing, shared by the XPAD MOT path and packet
//! mode data. Clause 5.3.3 of the transport standard.

use dab_core::crc::Crc16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentField {
    pub is_last_segment: bool,
    pub segment_number: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserAccessField<'a> {
    pub transport_id: Option<u16>,
    pub end_user_address: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MscDataGroup<'a> {
    pub data_group_type: u8,
    pub continuity_index: u8,
    pub repetition_index: u8,
    /// Conditional access parameters, kept opaque.
    pub extension_field: Option<u16>,
    pub segment: Option<SegmentField>,
    pub user_access: Option<UserAccessField<'a>>,
    pub data: &'a [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum MscDataGroupError {
    #[error("insufficient length for {section}: {remaining} < {required}")]
    Truncated { section: &'static str, remaining: usize, required: usize },
    #[error("data group crc mismatch")]
    CrcMismatch,
}

/// Parses one MSC data group, validating the trailing checksum when the
/// header announces one.
pub fn parse_msc_data_group(buf: &[u8]) -> Result<MscDataGroup<'_>, MscDataGroupError> {
    let truncated = |section: &'static str, remaining: usize, required: usize| {
        MscDataGroupError::Truncated { section, remaining, required }
    };

    // Part 1: data group header
    if buf.len() < 2 {
        return Err(truncated("data group header", buf.len(), 2));
    }
    let has_extension = (buf[0] & 0b10000000) != 0;
    let has_crc = (buf[0] & 0b01000000) != 0;
    let has_segment = (buf[0] & 0b00100000) != 0;
    let has_user_access = (buf[0] & 0b00010000) != 0;
    let data_group_type = buf[0] & 0b00001111;
    let continuity_index = (buf[1] & 0b11110000) >> 4;
    let repetition_index = buf[1] & 0b00001111;
    let mut curr_byte = 2;

    // Part 1.1: extension field carries conditional access information
    let extension_field = if has_extension {
        if buf.len() - curr_byte < 2 {
            return Err(truncated("extension field", buf.len() - curr_byte, 2));
        }
        let value = (u16::from(buf[curr_byte]) << 8) | u16::from(buf[curr_byte + 1]);
        curr_byte += 2;
        Some(value)
    } else {
        None
    };

    // Part 2.1: segment field of the session header
    let segment = if has_segment {
        if buf.len() - curr_byte < 2 {
            return Err(truncated("segment field", buf.len() - curr_byte, 2));
        }
        let is_last_segment = (buf[curr_byte] & 0b10000000) != 0;
        let segment_number =
            (u16::from(buf[curr_byte] & 0b01111111) << 8) | u16::from(buf[curr_byte + 1]);
        curr_byte += 2;
        Some(SegmentField { is_last_segment, segment_number })
    } else {
        None
    };

    // Part 2.2: user access field
    let user_access = if has_user_access {
        if buf.len() - curr_byte < 1 {
            return Err(truncated("user access field", 0, 1));
        }
        let has_transport_id = (buf[curr_byte] & 0b00010000) != 0;
        let length_indicator = (buf[curr_byte] & 0b00001111) as usize;
        curr_byte += 1;

        let nb_transport_id_bytes = if has_transport_id { 2 } else { 0 };
        if length_indicator < nb_transport_id_bytes {
            return Err(truncated("transport id", length_indicator, nb_transport_id_bytes));
        }
        if buf.len() - curr_byte < length_indicator {
            return Err(truncated("end user address", buf.len() - curr_byte, length_indicator));
        }
        let transport_id = if has_transport_id {
            let value = (u16::from(buf[curr_byte]) << 8) | u16::from(buf[curr_byte + 1]);
            curr_byte += 2;
            Some(value)
        } else {
            None
        };
        let nb_end_address_bytes = length_indicator - nb_transport_id_bytes;
        let end_user_address = &buf[curr_byte..curr_byte + nb_end_address_bytes];
        curr_byte += nb_end_address_bytes;
        Some(UserAccessField { transport_id, end_user_address })
    } else {
        None
    };

    // Part 3: data field with the optional checksum over the whole group
    let nb_crc_bytes = if has_crc { 2 } else { 0 };
    if buf.len() < curr_byte + nb_crc_bytes {
        return Err(truncated("data field", buf.len() - curr_byte, nb_crc_bytes));
    }
    if has_crc && !Crc16::dab_ccitt().validate_trailing(buf) {
        return Err(MscDataGroupError::CrcMismatch);
    }
    let data = &buf[curr_byte..buf.len() - nb_crc_bytes];

    Ok(MscDataGroup {
        data_group_type,
        continuity_index,
        repetition_index,
        extension_field,
        segment,
        user_access,
        data,
    })
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Builds an MSC data group with a segment field, a transport id and the
    /// trailing checksum, the shape used by MOT segments.
    pub fn make_mot_data_group(
        data_group_type: u8,
        continuity_index: u8,
        transport_id: u16,
        segment_number: u16,
        is_last_segment: bool,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.push(0b01110000 | (data_group_type & 0x0F));
        buf.push((continuity_index & 0x0F) << 4);
        let last_flag = if is_last_segment { 0x80 } else { 0x00 };
        buf.push(last_flag | ((segment_number >> 8) & 0x7F) as u8);
        buf.push((segment_number & 0xFF) as u8);
        buf.push(0b00010010); // transport id present, length indicator 2
        buf.push((transport_id >> 8) as u8);
        buf.push((transport_id & 0xFF) as u8);
        buf.extend_from_slice(payload);
        let crc = Crc16::dab_ccitt().process(&buf);
        buf.push((crc >> 8) as u8);
        buf.push((crc & 0xFF) as u8);
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::make_mot_data_group;
    use super::*;

    #[test]
    fn parses_a_mot_segment_group() {
        let payload = [1u8, 2, 3, 4, 5];
        let buf = make_mot_data_group(4, 7, 0xBEEF, 2, false, &payload);
        let group = parse_msc_data_group(&buf).unwrap();
        assert_eq!(group.data_group_type, 4);
        assert_eq!(group.continuity_index, 7);
        assert_eq!(group.segment, Some(SegmentField { is_last_segment: false, segment_number: 2 }));
        assert_eq!(group.user_access.unwrap().transport_id, Some(0xBEEF));
        assert_eq!(group.data, &payload);
    }

    #[test]
    fn corrupted_group_fails_the_checksum() {
        let mut buf = make_mot_data_group(3, 0, 1, 0, true, &[9, 9, 9]);
        buf[1] ^= 0x10;
        assert_eq!(parse_msc_data_group(&buf), Err(MscDataGroupError::CrcMismatch));
    }

    #[test]
    fn truncated_group_reports_the_missing_section() {
        let buf = [0b00100000u8, 0x00, 0x80];
        assert!(matches!(
            parse_msc_data_group(&buf),
            Err(MscDataGroupError::Truncated { section: "segment field", .. })
        ));
    }

    #[test]
    fn group_without_optional_fields_is_all_data() {
        let buf = [0b00000001u8, 0x00, 0xAA, 0xBB];
        let group = parse_msc_data_group(&buf).unwrap();
        assert_eq!(group.data_group_type, 1);
        assert!(group.segment.is_none());
        assert!(group.user_access.is_none());
        assert_eq!(group.data, &[0xAA, 0xBB]);
    }
}
