/// Soft decision value for a single code bit.
///
/// Values are offset binary: [`SOFT_DECISION_LOW`] is a confident logical 0,
/// [`SOFT_DECISION_HIGH`] a confident logical 1. Bits removed by puncturing
/// are reinserted as [`SOFT_DECISION_PUNCTURED`] which weighs both decisions
/// equally.
pub type SoftDecisionBit = i16;

pub const SOFT_DECISION_HIGH: SoftDecisionBit = 256;
pub const SOFT_DECISION_LOW: SoftDecisionBit = 0;
pub const SOFT_DECISION_PUNCTURED: SoftDecisionBit = (SOFT_DECISION_HIGH + SOFT_DECISION_LOW) / 2;

pub const CONSTRAINT_LENGTH: usize = 7;
pub const CODE_RATE: usize = 4;
const NUM_STATES: usize = 1 << (CONSTRAINT_LENGTH - 1);

/// DAB rate 1/4 mother code generator polynomials, octal {133, 171, 145, 133}.
pub const DAB_CONVOLUTIONAL_POLYS: [u8; CODE_RATE] = [0o133, 0o171, 0o145, 0o133];

// Path metrics grow monotonically, pull them back down before i16 overflow.
const RENORMALIZE_THRESHOLD: i16 = i16::MAX - 3000;
const INITIAL_START_ERROR: i16 = i16::MIN;
const INITIAL_NON_START_ERROR: i16 = i16::MIN + 3000;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DecodeResult {
    pub nb_encoded_bits: usize,
    pub nb_puncture_bits: usize,
    pub nb_decoded_bits: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ButterflyKernel {
    Scalar,
    #[cfg(target_arch = "x86_64")]
    Ssse3,
}

fn select_butterfly_kernel() -> ButterflyKernel {
    #[cfg(target_arch = "x86_64")]
    {
        if is_x86_feature_detected!("ssse3") {
            return ButterflyKernel::Ssse3;
        }
    }
    ButterflyKernel::Scalar
}

/// Soft decision Viterbi decoder for the K=7 rate 1/4 DAB mother code,
/// after Phil Karn's reference implementation.
///
/// Depuncturing and the add-compare-select butterfly run in
/// [`ViterbiDecoder::update`] which may be called repeatedly with different
/// puncture vectors over one message; [`ViterbiDecoder::get_traceback`] then
/// chains back through the packed decision history from the zero end state.
/// A vectorised SSSE3 butterfly is selected at runtime when available and
/// produces bit identical output to the scalar reference.
pub struct ViterbiDecoder {
    branch_table: [[i16; NUM_STATES / 2]; CODE_RATE],
    metrics: [[i16; NUM_STATES]; 2],
    old_metrics_index: usize,
    decisions: Vec<u64>,
    curr_decoded_bit: usize,
    depunctured_bits: Vec<SoftDecisionBit>,
    max_depunctured_bits: usize,
    kernel: ButterflyKernel,
}

impl ViterbiDecoder {
    /// `max_decoded_bits` bounds the total decision history across all
    /// `update` calls between resets, including the K-1 tail bits.
    pub fn new(polys: [u8; CODE_RATE], max_decoded_bits: usize) -> Self {
        let mut branch_table = [[0i16; NUM_STATES / 2]; CODE_RATE];
        for state in 0..NUM_STATES / 2 {
            for (j, poly) in polys.iter().enumerate() {
                let value = parity(((state as u8) << 1) & poly);
                branch_table[j][state] = if value != 0 {
                    SOFT_DECISION_HIGH
                } else {
                    SOFT_DECISION_LOW
                };
            }
        }

        let nb_tail_bits = CONSTRAINT_LENGTH - 1;
        let max_depunctured_bits = max_decoded_bits * CODE_RATE;
        let mut decoder = Self {
            branch_table,
            metrics: [[0i16; NUM_STATES]; 2],
            old_metrics_index: 0,
            decisions: vec![0u64; max_decoded_bits + nb_tail_bits],
            curr_decoded_bit: 0,
            depunctured_bits: vec![SOFT_DECISION_PUNCTURED; max_depunctured_bits],
            max_depunctured_bits,
            kernel: select_butterfly_kernel(),
        };
        decoder.reset();
        decoder
    }

    pub fn dab(max_decoded_bits: usize) -> Self {
        Self::new(DAB_CONVOLUTIONAL_POLYS, max_decoded_bits)
    }

    /// Restarts the trellis from the zero encoder state.
    pub fn reset(&mut self) {
        for metric in self.metrics[0].iter_mut() {
            *metric = INITIAL_NON_START_ERROR;
        }
        self.metrics[0][0] = INITIAL_START_ERROR;
        self.old_metrics_index = 0;
        self.curr_decoded_bit = 0;
        for decision in self.decisions.iter_mut() {
            *decision = 0;
        }
    }

    /// Depunctures `nb_puncture_bits` mother code bits through the cyclic
    /// `puncture_code` bitmap and advances the trellis. Each `1` in the
    /// bitmap consumes one soft bit from `encoded_bits`, each `0` reinserts
    /// a neutral punctured value. Returns how much of each stream was used.
    pub fn update(
        &mut self,
        encoded_bits: &[SoftDecisionBit],
        puncture_code: &[u8],
        nb_puncture_bits: usize,
    ) -> DecodeResult {
        let mut res = DecodeResult::default();
        if puncture_code.iter().all(|&v| v == 0) {
            return res;
        }

        let nb_encoded_bits = encoded_bits.len();
        let nb_puncture_code = puncture_code.len();
        let mut curr_encoded_bit = 0usize;
        let mut curr_puncture_bit = 0usize;

        while res.nb_puncture_bits < nb_puncture_bits {
            // Depuncture one block of mother code bits
            let mut total_depunctured_bits = 0usize;
            for i in 0..self.max_depunctured_bits {
                if curr_puncture_bit == nb_puncture_bits {
                    break;
                }
                let transmitted = puncture_code[curr_puncture_bit % nb_puncture_code];
                if transmitted != 0 && curr_encoded_bit == nb_encoded_bits {
                    break;
                }
                self.depunctured_bits[i] = if transmitted != 0 {
                    let bit = encoded_bits[curr_encoded_bit];
                    curr_encoded_bit += 1;
                    bit
                } else {
                    SOFT_DECISION_PUNCTURED
                };
                curr_puncture_bit += 1;
                total_depunctured_bits += 1;
            }

            let remaining_capacity = self.decisions.len() - self.curr_decoded_bit;
            let total_decoded_bits = (total_depunctured_bits / CODE_RATE).min(remaining_capacity);
            if total_decoded_bits == 0 {
                break;
            }

            res.nb_encoded_bits = curr_encoded_bit;
            res.nb_puncture_bits = curr_puncture_bit;
            res.nb_decoded_bits += total_decoded_bits;

            match self.kernel {
                ButterflyKernel::Scalar => self.update_block_scalar(total_decoded_bits),
                #[cfg(target_arch = "x86_64")]
                ButterflyKernel::Ssse3 => unsafe { self.update_block_ssse3(total_decoded_bits) },
            }
        }

        res
    }

    /// Reads `out_bytes.len() * 8` decoded bits msb first, chaining back
    /// from the zero end state. The K-1 tail decisions are skipped.
    pub fn get_traceback(&self, out_bytes: &mut [u8]) {
        const ADDSHIFT: usize = 8 - (CONSTRAINT_LENGTH - 1);
        let nb_tail_bits = CONSTRAINT_LENGTH - 1;
        let nbits = out_bytes.len() * 8;
        assert!(
            nbits + nb_tail_bits <= self.curr_decoded_bit,
            "Traceback of {} bits requires {} decoded bits but only {} are available",
            nbits,
            nbits + nb_tail_bits,
            self.curr_decoded_bit,
        );

        let decisions = &self.decisions[nb_tail_bits..];
        let mut curr_state: usize = 0;
        for i in (0..nbits).rev() {
            let state_index = curr_state >> ADDSHIFT;
            let input = ((decisions[i] >> state_index) & 0b1) as usize;
            curr_state = (curr_state >> 1) | (input << (CONSTRAINT_LENGTH - 2 + ADDSHIFT));
            out_bytes[i / 8] = (curr_state & 0xFF) as u8;
        }
    }

    /// Accumulated path metric of a state, used upstream as a signal
    /// quality indicator.
    pub fn get_path_error(&self, state: usize) -> i16 {
        self.metrics[self.old_metrics_index][state % NUM_STATES]
    }

    fn update_block_scalar(&mut self, nbits: usize) {
        const MAX_METRIC: i16 = (CODE_RATE as i16) * (SOFT_DECISION_HIGH - SOFT_DECISION_LOW);

        for s in 0..nbits {
            let sym_base = s * CODE_RATE;
            let (first, second) = self.metrics.split_at_mut(1);
            let (old, new): (&[i16; NUM_STATES], &mut [i16; NUM_STATES]) =
                if self.old_metrics_index == 0 {
                    (&first[0], &mut second[0])
                } else {
                    (&second[0], &mut first[0])
                };

            let mut decisions: u64 = 0;
            for i in 0..NUM_STATES / 2 {
                let mut metric: i32 = 0;
                for j in 0..CODE_RATE {
                    let sym = self.depunctured_bits[sym_base + j];
                    let error = i32::from(self.branch_table[j][i]) - i32::from(sym);
                    metric += error.abs();
                }
                let metric = metric as i16;
                let m_metric = MAX_METRIC - metric;

                let m0 = old[i].saturating_add(metric);
                let m1 = old[i + NUM_STATES / 2].saturating_add(m_metric);
                let m2 = old[i].saturating_add(m_metric);
                let m3 = old[i + NUM_STATES / 2].saturating_add(metric);

                let decision0 = m0 >= m1;
                let decision1 = m2 >= m3;

                new[2 * i] = if decision0 { m1 } else { m0 };
                new[2 * i + 1] = if decision1 { m3 } else { m2 };

                decisions |= u64::from(decision0) << (2 * i);
                decisions |= u64::from(decision1) << (2 * i + 1);
            }

            renormalize(new);
            self.decisions[self.curr_decoded_bit] = decisions;
            self.curr_decoded_bit += 1;
            self.old_metrics_index ^= 1;
        }
    }

    // Lane layout mirrors the scalar butterfly: iteration i covers
    // butterflies 8i..8i+8, decisions pack two bits per butterfly.
    #[cfg(target_arch = "x86_64")]
    #[target_feature(enable = "ssse3")]
    unsafe fn update_block_ssse3(&mut self, nbits: usize) {
        use core::arch::x86_64::*;

        const MAX_METRIC: i16 = (CODE_RATE as i16) * (SOFT_DECISION_HIGH - SOFT_DECISION_LOW);
        let max_metric = _mm_set1_epi16(MAX_METRIC);
        let zero = _mm_setzero_si128();

        for s in 0..nbits {
            let sym_base = s * CODE_RATE;
            let mut sym = [zero; CODE_RATE];
            for j in 0..CODE_RATE {
                sym[j] = _mm_set1_epi16(self.depunctured_bits[sym_base + j]);
            }

            let old_index = self.old_metrics_index;
            let (first, second) = self.metrics.split_at_mut(1);
            let (old, new): (&[i16; NUM_STATES], &mut [i16; NUM_STATES]) = if old_index == 0 {
                (&first[0], &mut second[0])
            } else {
                (&second[0], &mut first[0])
            };

            let mut decisions: u64 = 0;
            for i in 0..NUM_STATES / 16 {
                let mut metric = zero;
                for j in 0..CODE_RATE {
                    let branch =
                        _mm_loadu_si128(self.branch_table[j][8 * i..].as_ptr() as *const __m128i);
                    let error = _mm_abs_epi16(_mm_subs_epi16(branch, sym[j]));
                    metric = _mm_add_epi16(metric, error);
                }
                let m_metric = _mm_sub_epi16(max_metric, metric);

                let old_lo = _mm_loadu_si128(old[8 * i..].as_ptr() as *const __m128i);
                let old_hi =
                    _mm_loadu_si128(old[NUM_STATES / 2 + 8 * i..].as_ptr() as *const __m128i);

                let m0 = _mm_adds_epi16(old_lo, metric);
                let m1 = _mm_adds_epi16(old_hi, m_metric);
                let m2 = _mm_adds_epi16(old_lo, m_metric);
                let m3 = _mm_adds_epi16(old_hi, metric);

                let survivor0 = _mm_min_epi16(m0, m1);
                let survivor1 = _mm_min_epi16(m2, m3);
                let decision0 = _mm_cmpeq_epi16(survivor0, m1);
                let decision1 = _mm_cmpeq_epi16(survivor1, m3);

                // Pack the two decision vectors into alternating bits
                let mask = _mm_movemask_epi8(_mm_unpacklo_epi8(
                    _mm_packs_epi16(decision0, zero),
                    _mm_packs_epi16(decision1, zero),
                )) as u32 as u64;
                decisions |= mask << (16 * i);

                _mm_storeu_si128(
                    new[16 * i..].as_mut_ptr() as *mut __m128i,
                    _mm_unpacklo_epi16(survivor0, survivor1),
                );
                _mm_storeu_si128(
                    new[16 * i + 8..].as_mut_ptr() as *mut __m128i,
                    _mm_unpackhi_epi16(survivor0, survivor1),
                );
            }

            renormalize(new);
            self.decisions[self.curr_decoded_bit] = decisions;
            self.curr_decoded_bit += 1;
            self.old_metrics_index ^= 1;
        }
    }

    #[cfg(test)]
    fn force_scalar_kernel(&mut self) {
        self.kernel = ButterflyKernel::Scalar;
    }
}

fn renormalize(metrics: &mut [i16; NUM_STATES]) {
    if metrics[0] >= RENORMALIZE_THRESHOLD {
        let minimum = *metrics.iter().min().expect("metrics are never empty");
        let adjust = minimum - i16::MIN;
        for metric in metrics.iter_mut() {
            *metric -= adjust;
        }
    }
}

fn parity(value: u8) -> u8 {
    (value.count_ones() & 0b1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convolutional_encoder::ConvolutionalEncoder;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const ALL_PRESENT: [u8; 1] = [1];

    fn to_soft_bits(code_bits: &[u8]) -> Vec<SoftDecisionBit> {
        code_bits
            .iter()
            .map(|&b| if b != 0 { SOFT_DECISION_HIGH } else { SOFT_DECISION_LOW })
            .collect()
    }

    fn encode_and_decode(message: &[u8], corrupt: impl Fn(&mut Vec<SoftDecisionBit>)) -> Vec<u8> {
        let mut encoder = ConvolutionalEncoder::new();
        let code_bits = encoder.encode_with_tail(message);
        let mut soft_bits = to_soft_bits(&code_bits);
        corrupt(&mut soft_bits);

        let nb_decoded_bits = message.len() * 8 + CONSTRAINT_LENGTH - 1;
        let mut decoder = ViterbiDecoder::dab(nb_decoded_bits);
        let res = decoder.update(&soft_bits, &ALL_PRESENT, soft_bits.len());
        assert_eq!(res.nb_decoded_bits, nb_decoded_bits);

        let mut decoded = vec![0u8; message.len()];
        decoder.get_traceback(&mut decoded);
        decoded
    }

    #[test]
    fn decodes_clean_reference_message() {
        let decoded = encode_and_decode(&[0x5A, 0x3C], |_| {});
        assert_eq!(decoded, vec![0x5A, 0x3C]);
    }

    #[test]
    fn clean_message_produces_88_code_bits() {
        let mut encoder = ConvolutionalEncoder::new();
        let code_bits = encoder.encode_with_tail(&[0x5A, 0x3C]);
        assert_eq!(code_bits.len(), 88);
    }

    #[test]
    fn corrects_random_errors_at_five_percent_ber() {
        let mut rng = StdRng::seed_from_u64(0x5EED);
        for _ in 0..8 {
            let message: Vec<u8> = (0..128).map(|_| rng.gen::<u8>()).collect();
            let nb_errors_cell = std::cell::Cell::new(0usize);
            let seed = rng.gen::<u64>();
            let decoded = encode_and_decode(&message, |soft_bits| {
                let mut noise_rng = StdRng::seed_from_u64(seed);
                let nb_errors = soft_bits.len() / 20;
                nb_errors_cell.set(nb_errors);
                for _ in 0..nb_errors {
                    let index = noise_rng.gen_range(0..soft_bits.len());
                    soft_bits[index] = SOFT_DECISION_HIGH - soft_bits[index];
                }
            });
            assert_eq!(decoded, message, "failed with {} flipped bits", nb_errors_cell.get());
        }
    }

    #[test]
    fn all_zero_puncture_pattern_decodes_nothing() {
        let mut decoder = ViterbiDecoder::dab(64);
        let res = decoder.update(&[], &[0, 0, 0, 0], 128);
        assert_eq!(res, DecodeResult::default());
    }

    #[test]
    fn punctured_bits_consume_no_input() {
        // Pattern keeps 3 of every 4 mother bits
        let pattern = [1, 1, 1, 0];
        let mut decoder = ViterbiDecoder::dab(64);
        let soft_bits = vec![SOFT_DECISION_LOW; 96];
        let res = decoder.update(&soft_bits, &pattern, 128);
        assert_eq!(res.nb_puncture_bits, 128);
        assert_eq!(res.nb_encoded_bits, 96);
        assert_eq!(res.nb_decoded_bits, 32);
    }

    #[test]
    fn scalar_and_selected_kernels_agree() {
        let mut rng = StdRng::seed_from_u64(0xDAB);
        let message: Vec<u8> = (0..96).map(|_| rng.gen::<u8>()).collect();
        let mut encoder = ConvolutionalEncoder::new();
        let code_bits = encoder.encode_with_tail(&message);
        let mut soft_bits = to_soft_bits(&code_bits);
        for bit in soft_bits.iter_mut() {
            // Mild soft noise keeps the comparison sensitive to metric math
            *bit += rng.gen_range(-48..=48);
            *bit = (*bit).clamp(SOFT_DECISION_LOW - 32, SOFT_DECISION_HIGH + 32);
        }

        let nb_decoded_bits = message.len() * 8 + CONSTRAINT_LENGTH - 1;
        let mut reference = ViterbiDecoder::dab(nb_decoded_bits);
        reference.force_scalar_kernel();
        let mut selected = ViterbiDecoder::dab(nb_decoded_bits);

        reference.update(&soft_bits, &ALL_PRESENT, soft_bits.len());
        selected.update(&soft_bits, &ALL_PRESENT, soft_bits.len());

        let mut out_reference = vec![0u8; message.len()];
        let mut out_selected = vec![0u8; message.len()];
        reference.get_traceback(&mut out_reference);
        selected.get_traceback(&mut out_selected);
        assert_eq!(out_reference, out_selected);
        for state in 0..64 {
            assert_eq!(reference.get_path_error(state), selected.get_path_error(state));
        }
    }

    #[test]
    fn path_error_of_end_state_is_minimal_for_clean_input() {
        let mut encoder = ConvolutionalEncoder::new();
        let code_bits = encoder.encode_with_tail(&[0xC3, 0x3C, 0x0F]);
        let soft_bits = to_soft_bits(&code_bits);

        let mut decoder = ViterbiDecoder::dab(30);
        decoder.update(&soft_bits, &ALL_PRESENT, soft_bits.len());
        let zero_state_error = decoder.get_path_error(0);
        for state in 1..64 {
            assert!(zero_state_error <= decoder.get_path_error(state));
        }
    }
}
