use dab_core::additive_scrambler::AdditiveScrambler;
use dab_core::crc::Crc16;
use dab_core::puncture_codes::get_fic_puncture_schedule;
use dab_core::viterbi_decoder::{SoftDecisionBit, ViterbiDecoder, CONSTRAINT_LENGTH};

pub const NB_FIB_BYTES: usize = 32;
const NB_FIB_DATA_BYTES: usize = NB_FIB_BYTES - 2;

/// One validated fast information block including its checksum trailer.
pub type FibBuffer = [u8; NB_FIB_BYTES];

/// Error corrects and validates fast information blocks.
///
/// FIBs arrive in groups of three (modes I, II, IV) or four (mode III).
/// Each group is depunctured with the FIC schedule, Viterbi decoded,
/// descrambled and split into 32 byte FIBs which are individually checked
/// against their CRC.
pub struct FicDecoder {
    vitdec: ViterbiDecoder,
    scrambler: AdditiveScrambler,
    crc16: Crc16,
    nb_fibs_per_group: usize,
    nb_encoded_bits: usize,
    pub total_fib_groups: u32,
    pub total_fibs_valid: u32,
    pub total_fibs_crc_errors: u32,
}

impl FicDecoder {
    /// `nb_fibs_per_group` is 3 or 4 depending on the transmission mode.
    pub fn new(nb_fibs_per_group: usize) -> Self {
        let schedule = get_fic_puncture_schedule(nb_fibs_per_group);
        let nb_encoded_bits: usize = schedule.iter().map(|step| step.nb_transmitted_bits()).sum();
        let nb_decoded_bits = nb_fibs_per_group * NB_FIB_BYTES * 8 + CONSTRAINT_LENGTH - 1;
        Self {
            vitdec: ViterbiDecoder::dab(nb_decoded_bits),
            scrambler: AdditiveScrambler::dab_energy_dispersal(),
            crc16: Crc16::dab_ccitt(),
            nb_fibs_per_group,
            nb_encoded_bits,
            total_fib_groups: 0,
            total_fibs_valid: 0,
            total_fibs_crc_errors: 0,
        }
    }

    /// Number of soft bits carrying one FIB group on air.
    pub fn nb_encoded_bits(&self) -> usize {
        self.nb_encoded_bits
    }

    /// Decodes one FIB group and returns the FIBs whose checksum passed.
    /// `cif_index` is only used for log context.
    pub fn decode_fib_group(
        &mut self,
        encoded_bits: &[SoftDecisionBit],
        cif_index: usize,
    ) -> Vec<FibBuffer> {
        assert!(
            encoded_bits.len() == self.nb_encoded_bits,
            "FIB group requires {} soft bits but got {}",
            self.nb_encoded_bits,
            encoded_bits.len(),
        );
        self.total_fib_groups += 1;

        self.vitdec.reset();
        let mut curr_encoded_bit = 0;
        for step in get_fic_puncture_schedule(self.nb_fibs_per_group) {
            let res = self.vitdec.update(
                &encoded_bits[curr_encoded_bit..],
                step.code,
                step.nb_mother_bits,
            );
            curr_encoded_bit += res.nb_encoded_bits;
        }

        let mut decoded_bytes = vec![0u8; self.nb_fibs_per_group * NB_FIB_BYTES];
        self.vitdec.get_traceback(&mut decoded_bytes);

        self.scrambler.reset();
        self.scrambler.descramble(&mut decoded_bytes);

        let mut fibs = Vec::with_capacity(self.nb_fibs_per_group);
        for (fib_index, fib_buf) in decoded_bytes.chunks_exact(NB_FIB_BYTES).enumerate() {
            // The checksum is ones complemented at transmission, which the
            // final XOR of the CRC instance already accounts for
            if !self.crc16.validate_trailing(fib_buf) {
                self.total_fibs_crc_errors += 1;
                log::warn!(
                    target: "fic-decoder",
                    "FIB crc mismatch cif={} fib={}",
                    cif_index, fib_index,
                );
                continue;
            }
            self.total_fibs_valid += 1;
            let mut fib = [0u8; NB_FIB_BYTES];
            fib.copy_from_slice(fib_buf);
            fibs.push(fib);
        }
        fibs
    }

    /// Current Viterbi path metric, a relative signal quality indicator.
    pub fn path_error(&self) -> i16 {
        self.vitdec.get_path_error(0)
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use dab_core::convolutional_encoder::ConvolutionalEncoder;
    use dab_core::viterbi_decoder::{SOFT_DECISION_HIGH, SOFT_DECISION_LOW};

    /// Transmitter side of the FIC: scramble, convolutionally encode and
    /// puncture a FIB group into its transmitted soft bits.
    pub fn encode_fib_group(fib_group: &[u8]) -> Vec<SoftDecisionBit> {
        let nb_fibs_per_group = fib_group.len() / NB_FIB_BYTES;
        let mut scrambled = fib_group.to_vec();
        let mut scrambler = AdditiveScrambler::dab_energy_dispersal();
        scrambler.descramble(&mut scrambled);

        let mut encoder = ConvolutionalEncoder::new();
        let mother_bits = encoder.encode_with_tail(&scrambled);

        let mut soft_bits = Vec::new();
        let mut curr_mother_bit = 0;
        for step in get_fic_puncture_schedule(nb_fibs_per_group) {
            for i in 0..step.nb_mother_bits {
                let transmitted = step.code[i % step.code.len()];
                let bit = mother_bits[curr_mother_bit];
                curr_mother_bit += 1;
                if transmitted != 0 {
                    soft_bits.push(if bit != 0 { SOFT_DECISION_HIGH } else { SOFT_DECISION_LOW });
                }
            }
        }
        soft_bits
    }

    /// Builds one FIB from a FIG payload, padded with end markers and
    /// terminated by the checksum trailer.
    pub fn make_fib(payload: &[u8]) -> FibBuffer {
        assert!(payload.len() <= NB_FIB_DATA_BYTES);
        let mut fib = [0u8; NB_FIB_BYTES];
        fib[..payload.len()].copy_from_slice(payload);
        for byte in fib[payload.len()..NB_FIB_DATA_BYTES].iter_mut() {
            *byte = 0xFF;
        }
        let crc = Crc16::dab_ccitt().process(&fib[..NB_FIB_DATA_BYTES]);
        fib[NB_FIB_DATA_BYTES] = (crc >> 8) as u8;
        fib[NB_FIB_DATA_BYTES + 1] = (crc & 0xFF) as u8;
        fib
    }

    pub fn make_fib_group(fibs: [FibBuffer; 3]) -> [u8; 3 * NB_FIB_BYTES] {
        let mut group = [0u8; 3 * NB_FIB_BYTES];
        for (i, fib) in fibs.iter().enumerate() {
            group[i * NB_FIB_BYTES..(i + 1) * NB_FIB_BYTES].copy_from_slice(fib);
        }
        group
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use dab_core::viterbi_decoder::{SOFT_DECISION_HIGH, SOFT_DECISION_PUNCTURED};

    #[test]
    fn clean_fib_group_round_trips() {
        let fib = make_fib(&[0x10, 0x21, 0x32, 0x43]);
        let group = make_fib_group([fib, fib, fib]);
        let soft_bits = encode_fib_group(&group);
        assert_eq!(soft_bits.len(), 2304);

        let mut decoder = FicDecoder::new(3);
        let fibs = decoder.decode_fib_group(&soft_bits, 0);
        assert_eq!(fibs.len(), 3);
        for decoded in &fibs {
            assert_eq!(decoded, &fib);
        }
        assert_eq!(decoder.total_fibs_valid, 3);
        assert_eq!(decoder.total_fibs_crc_errors, 0);
    }

    #[test]
    fn four_fib_groups_of_mode_three_round_trip() {
        let fib = make_fib(&[0x77, 0x66, 0x55]);
        let mut group = Vec::new();
        for _ in 0..4 {
            group.extend_from_slice(&fib);
        }
        let soft_bits = encode_fib_group(&group);
        assert_eq!(soft_bits.len(), 3072);

        let mut decoder = FicDecoder::new(4);
        let fibs = decoder.decode_fib_group(&soft_bits, 0);
        assert_eq!(fibs.len(), 4);
    }

    #[test]
    fn corrupted_fib_is_dropped_and_counted() {
        let fib = make_fib(&[0x01, 0x02, 0x03]);
        let group = make_fib_group([fib, fib, fib]);
        let mut soft_bits = encode_fib_group(&group);
        // Hammer the middle FIB's soft bits beyond what the code can correct
        for bit in soft_bits.iter_mut().skip(800).take(120) {
            *bit = SOFT_DECISION_PUNCTURED;
        }
        for bit in soft_bits.iter_mut().skip(800).take(60) {
            *bit = SOFT_DECISION_HIGH - *bit;
        }

        let mut decoder = FicDecoder::new(3);
        let fibs = decoder.decode_fib_group(&soft_bits, 1);
        assert!(fibs.len() < 3);
        assert!(decoder.total_fibs_crc_errors > 0);
    }

    #[test]
    fn light_noise_is_corrected() {
        let fib = make_fib(&[0xAA, 0x55, 0x0F, 0xF0, 0x12]);
        let group = make_fib_group([fib, fib, fib]);
        let mut soft_bits = encode_fib_group(&group);
        for bit in soft_bits.iter_mut().step_by(53) {
            *bit = SOFT_DECISION_PUNCTURED;
        }

        let mut decoder = FicDecoder::new(3);
        let fibs = decoder.decode_fib_group(&soft_bits, 2);
        assert_eq!(fibs.len(), 3);
    }
}
