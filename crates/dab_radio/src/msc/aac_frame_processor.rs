//! DAB+ audio super frame handling: fire code synchronisation, the byte
//! interleaved Reed-Solomon layer and access unit extraction.

use dab_core::crc::Crc16;
use dab_core::firecode::firecode_check;
use dab_core::reed_solomon::ReedSolomon;

/// Number of logical frames (CIFs) that make up one audio super frame.
pub const NB_FRAMES_PER_SUPER_FRAME: usize = 5;
/// Reed-Solomon codeword length and payload length of the super frame code.
pub const RS_CODEWORD_BYTES: usize = 120;
pub const RS_PAYLOAD_BYTES: usize = 110;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AacAudioParameters {
    pub sample_rate_hz: u32,
    pub is_sbr: bool,
    pub is_parametric_stereo: bool,
    pub is_stereo: bool,
    pub mpeg_surround_config: u8,
}

/// The decoded contents of one super frame: the audio configuration and the
/// AAC access units whose checksum passed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuperFrameResult {
    pub params: AacAudioParameters,
    pub access_units: Vec<Vec<u8>>,
}

/// Assembles five logical frames into a super frame, repairs it with the
/// byte interleaved RS(120,110) code and splits it into access units.
///
/// Synchronisation scans for a valid fire code at a logical frame boundary;
/// any fire code or RS failure drops the super frame and resynchronises.
pub struct AacFrameProcessor {
    rs: ReedSolomon,
    crc16: Crc16,
    nb_frame_bytes: usize,
    super_frame: Vec<u8>,
    curr_frame: usize,
    is_synced: bool,
    pub total_super_frames: u32,
    pub total_firecode_errors: u32,
    pub total_rs_uncorrectable: u32,
    pub total_rs_corrected_bytes: u32,
    pub total_au_crc_errors: u32,
}

impl AacFrameProcessor {
    /// `nb_frame_bytes` is the logical frame size of the subchannel and
    /// must be a multiple of the RS codeword count per frame.
    pub fn new(nb_frame_bytes: usize) -> Self {
        assert!(
            nb_frame_bytes > 0 && nb_frame_bytes % (RS_CODEWORD_BYTES / NB_FRAMES_PER_SUPER_FRAME) == 0,
            "Logical frame of {} bytes cannot carry the super frame RS layer",
            nb_frame_bytes,
        );
        Self {
            rs: ReedSolomon::dab_plus_super_frame(),
            crc16: Crc16::dab_ccitt(),
            nb_frame_bytes,
            super_frame: vec![0u8; nb_frame_bytes * NB_FRAMES_PER_SUPER_FRAME],
            curr_frame: 0,
            is_synced: false,
            total_super_frames: 0,
            total_firecode_errors: 0,
            total_rs_uncorrectable: 0,
            total_rs_corrected_bytes: 0,
            total_au_crc_errors: 0,
        }
    }

    /// Consumes one logical frame. Returns the decoded super frame when the
    /// fifth frame completes it and every layer validated.
    pub fn push_frame(&mut self, frame: &[u8]) -> Option<SuperFrameResult> {
        assert!(frame.len() == self.nb_frame_bytes);

        if !self.is_synced {
            // A super frame starts at a logical frame whose header passes
            // the fire code
            if !firecode_check(frame) {
                self.total_firecode_errors += 1;
                return None;
            }
            self.is_synced = true;
            self.curr_frame = 0;
        }

        let offset = self.curr_frame * self.nb_frame_bytes;
        self.super_frame[offset..offset + self.nb_frame_bytes].copy_from_slice(frame);
        self.curr_frame += 1;
        if self.curr_frame < NB_FRAMES_PER_SUPER_FRAME {
            return None;
        }
        self.curr_frame = 0;

        match self.process_super_frame() {
            Some(result) => Some(result),
            None => {
                self.is_synced = false;
                None
            }
        }
    }

    fn process_super_frame(&mut self) -> Option<SuperFrameResult> {
        // The RS codewords are byte interleaved across the super frame:
        // codeword j owns bytes j, j+stride, j+2*stride, ...
        let stride = self.super_frame.len() / RS_CODEWORD_BYTES;
        let mut codeword = [0u8; RS_CODEWORD_BYTES];
        for j in 0..stride {
            for (i, value) in codeword.iter_mut().enumerate() {
                *value = self.super_frame[j + i * stride];
            }
            match self.rs.decode(&mut codeword) {
                Ok(nb_corrected) => {
                    if nb_corrected > 0 {
                        self.total_rs_corrected_bytes += nb_corrected as u32;
                        for (i, &value) in codeword.iter().enumerate() {
                            self.super_frame[j + i * stride] = value;
                        }
                    }
                }
                Err(_) => {
                    self.total_rs_uncorrectable += 1;
                    log::warn!(target: "aac-frame-processor", "uncorrectable RS codeword {}", j);
                    return None;
                }
            }
        }

        let payload_len = RS_PAYLOAD_BYTES * stride;
        if !firecode_check(&self.super_frame[..payload_len]) {
            self.total_firecode_errors += 1;
            log::warn!(target: "aac-frame-processor", "fire code failed after RS decode");
            return None;
        }

        // Header: 16 bit fire code then the audio configuration
        let config = self.super_frame[2];
        let dac_rate = (config & 0b01000000) != 0;
        let is_sbr = (config & 0b00100000) != 0;
        let is_stereo = (config & 0b00010000) != 0;
        let is_parametric_stereo = (config & 0b00001000) != 0;
        let mpeg_surround_config = config & 0b00000111;

        let params = AacAudioParameters {
            sample_rate_hz: if dac_rate { 48_000 } else { 32_000 },
            is_sbr,
            is_parametric_stereo,
            is_stereo,
            mpeg_surround_config,
        };

        let (nb_access_units, first_au_start) = match (dac_rate, is_sbr) {
            (false, true) => (2usize, 5usize),
            (true, true) => (3, 6),
            (false, false) => (4, 8),
            (true, false) => (6, 11),
        };

        // 12 bit access unit start addresses follow the configuration byte
        let mut au_starts = Vec::with_capacity(nb_access_units + 1);
        au_starts.push(first_au_start);
        for i in 0..nb_access_units - 1 {
            let bit_offset = 24 + 12 * i;
            let byte = bit_offset / 8;
            let value = if bit_offset % 8 == 0 {
                (u16::from(self.super_frame[byte]) << 4)
                    | u16::from(self.super_frame[byte + 1] >> 4)
            } else {
                (u16::from(self.super_frame[byte] & 0x0F) << 8)
                    | u16::from(self.super_frame[byte + 1])
            };
            au_starts.push(value as usize);
        }
        au_starts.push(payload_len);

        let is_monotonic = au_starts.windows(2).all(|pair| pair[0] < pair[1]);
        if !is_monotonic || au_starts[nb_access_units] > payload_len {
            log::warn!(target: "aac-frame-processor", "inconsistent access unit table {:?}", au_starts);
            return None;
        }

        let mut access_units = Vec::with_capacity(nb_access_units);
        for i in 0..nb_access_units {
            let au = &self.super_frame[au_starts[i]..au_starts[i + 1]];
            // Every access unit ends in its own checksum
            if au.len() < 2 || !self.crc16.validate_trailing(au) {
                self.total_au_crc_errors += 1;
                log::warn!(target: "aac-frame-processor", "access unit {} crc mismatch", i);
                continue;
            }
            access_units.push(au[..au.len() - 2].to_vec());
        }

        self.total_super_frames += 1;
        Some(SuperFrameResult { params, access_units })
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::make_super_frame;
    use super::*;

    // 16 kbit/s subchannel: 48 bytes per logical frame, stride 2
    const NB_FRAME_BYTES: usize = 48;

    // Two access units filling the 220 byte payload exactly:
    // header 5 + (40 + crc) + (171 + crc) = 220
    fn make_payloads() -> Vec<Vec<u8>> {
        let first: Vec<u8> = (0u16..40).map(|j| j as u8).collect();
        let second: Vec<u8> = (0u16..171).map(|j| (j * 3 + 40) as u8).collect();
        vec![first, second]
    }

    #[test]
    fn clean_super_frame_yields_access_units() {
        let payloads = make_payloads();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let frames = make_super_frame(NB_FRAME_BYTES, false, true, &payload_refs);

        let mut processor = AacFrameProcessor::new(NB_FRAME_BYTES);
        let mut result = None;
        for frame in &frames {
            result = processor.push_frame(frame);
        }
        let result = result.expect("super frame decodes");
        assert_eq!(result.access_units, payloads);
        assert_eq!(result.params.sample_rate_hz, 32_000);
        assert!(result.params.is_sbr);
        assert_eq!(processor.total_super_frames, 1);
    }

    #[test]
    fn byte_errors_are_repaired_by_the_rs_layer() {
        let payloads = make_payloads();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let mut frames = make_super_frame(NB_FRAME_BYTES, false, true, &payload_refs);
        // Three byte errors land in three different codewords at most
        frames[1][7] ^= 0xA5;
        frames[2][20] ^= 0x0F;
        frames[3][33] ^= 0x81;

        let mut processor = AacFrameProcessor::new(NB_FRAME_BYTES);
        let mut result = None;
        for frame in &frames {
            result = processor.push_frame(frame);
        }
        let result = result.expect("correctable byte errors decode");
        assert_eq!(result.access_units, payloads);
        assert!(processor.total_rs_corrected_bytes >= 3);
    }

    #[test]
    fn sync_skips_frames_until_a_fire_code_matches() {
        let payloads = make_payloads();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let frames = make_super_frame(NB_FRAME_BYTES, false, true, &payload_refs);

        let mut processor = AacFrameProcessor::new(NB_FRAME_BYTES);
        // Mid stream garbage first: a frame whose fire code word is wrong
        let mut junk = frames[0].clone();
        junk[0] ^= 0xFF;
        for _ in 0..2 {
            assert!(processor.push_frame(&junk).is_none());
        }
        assert!(processor.total_firecode_errors > 0);
        // Then a full super frame decodes normally
        let mut result = None;
        for frame in &frames {
            result = processor.push_frame(frame);
        }
        assert!(result.is_some());
    }

    #[test]
    fn corrupted_access_unit_is_dropped() {
        let payloads = make_payloads();
        let payload_refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let mut frames = make_super_frame(NB_FRAME_BYTES, false, true, &payload_refs);
        // Overwhelm RS codeword 0: corrupt eleven of its interleaved bytes
        for i in 0..11 {
            let byte_index = i * 2;
            frames[byte_index / NB_FRAME_BYTES][byte_index % NB_FRAME_BYTES] ^= 0xFF;
        }

        let mut processor = AacFrameProcessor::new(NB_FRAME_BYTES);
        let mut result = None;
        for frame in &frames {
            result = processor.push_frame(frame);
        }
        // Either the RS layer reports the column as uncorrectable or the
        // headers fail their checks; nothing valid may be emitted
        assert!(result.is_none());
        assert!(processor.total_rs_uncorrectable > 0 || processor.total_firecode_errors > 0);
    }
}
