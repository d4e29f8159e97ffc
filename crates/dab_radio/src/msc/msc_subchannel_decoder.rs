use super::time_deinterleaver::TimeDeinterleaver;
use crate::database::entities::Subchannel;
use dab_core::additive_scrambler::AdditiveScrambler;
use dab_core::puncture_codes::{get_eep_profile, get_uep_profile, PunctureStep};
use dab_core::viterbi_decoder::{SoftDecisionBit, ViterbiDecoder, CONSTRAINT_LENGTH};

/// Bits per capacity unit in the main service channel.
pub const BITS_PER_CAPACITY_UNIT: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum MscDecoderError {
    #[error("subchannel {id} references invalid UEP table index {table_index}")]
    InvalidUepTableIndex { id: u8, table_index: u8 },
    #[error("UEP table index {table_index} expects {expected} CU but subchannel {id} has {actual} CU")]
    UepSizeMismatch { id: u8, table_index: u8, expected: usize, actual: usize },
    #[error("subchannel {id} size {size_cu} CU is invalid for EEP {eep_type:?} level {level}")]
    InvalidEepSize { id: u8, eep_type: dab_core::puncture_codes::EepType, level: u8, size_cu: usize },
}

/// Recovers the logical frame bytes of one audio subchannel from each CIF.
///
/// The subchannel's slice of the CIF is time deinterleaved, depunctured
/// with its UEP or EEP schedule, Viterbi decoded and descrambled. The
/// energy dispersal register is reset at every CIF boundary.
pub struct MscSubchannelDecoder {
    start_bit: usize,
    nb_subchannel_bits: usize,
    schedule: Vec<PunctureStep>,
    nb_decoded_bytes: usize,
    deinterleaver: TimeDeinterleaver,
    vitdec: ViterbiDecoder,
    scrambler: AdditiveScrambler,
    pub total_cifs: u32,
    pub total_frames: u32,
}

impl MscSubchannelDecoder {
    pub fn new(subchannel: &Subchannel) -> Result<Self, MscDecoderError> {
        let size_cu = subchannel.length as usize;
        let (schedule, nb_decoded_bytes) = if subchannel.is_uep {
            let table_index = subchannel.uep_prot_index;
            let profile = get_uep_profile(table_index as usize).ok_or(
                MscDecoderError::InvalidUepTableIndex { id: subchannel.id, table_index },
            )?;
            if profile.subchannel_size_cu() != size_cu {
                return Err(MscDecoderError::UepSizeMismatch {
                    id: subchannel.id,
                    table_index,
                    expected: profile.subchannel_size_cu(),
                    actual: size_cu,
                });
            }
            (profile.puncture_schedule(), profile.nb_decoded_bytes())
        } else {
            let profile = get_eep_profile(subchannel.eep_prot_level, subchannel.eep_type, size_cu)
                .ok_or(MscDecoderError::InvalidEepSize {
                    id: subchannel.id,
                    eep_type: subchannel.eep_type,
                    level: subchannel.eep_prot_level,
                    size_cu,
                })?;
            (profile.puncture_schedule().to_vec(), profile.nb_decoded_bytes())
        };

        let nb_subchannel_bits = size_cu * BITS_PER_CAPACITY_UNIT;
        let nb_decoded_bits = nb_decoded_bytes * 8 + CONSTRAINT_LENGTH - 1;
        Ok(Self {
            start_bit: subchannel.start_address as usize * BITS_PER_CAPACITY_UNIT,
            nb_subchannel_bits,
            schedule,
            nb_decoded_bytes,
            deinterleaver: TimeDeinterleaver::new(nb_subchannel_bits),
            vitdec: ViterbiDecoder::dab(nb_decoded_bits),
            scrambler: AdditiveScrambler::dab_energy_dispersal(),
            total_cifs: 0,
            total_frames: 0,
        })
    }

    /// Logical frame bytes produced for every CIF once primed.
    pub fn nb_decoded_bytes(&self) -> usize {
        self.nb_decoded_bytes
    }

    /// Consumes the soft bits of one whole CIF and returns this
    /// subchannel's logical frame once the deinterleaver has primed.
    pub fn decode_cif(&mut self, cif_bits: &[SoftDecisionBit]) -> Option<Vec<u8>> {
        self.total_cifs += 1;
        let subchannel_bits = &cif_bits[self.start_bit..self.start_bit + self.nb_subchannel_bits];
        let deinterleaved = self.deinterleaver.push(subchannel_bits)?;

        self.vitdec.reset();
        let mut curr_encoded_bit = 0;
        for step in &self.schedule {
            let res = self.vitdec.update(
                &deinterleaved[curr_encoded_bit..],
                step.code,
                step.nb_mother_bits,
            );
            curr_encoded_bit += res.nb_encoded_bits;
        }

        let mut decoded = vec![0u8; self.nb_decoded_bytes];
        self.vitdec.get_traceback(&mut decoded);

        self.scrambler.reset();
        self.scrambler.descramble(&mut decoded);

        self.total_frames += 1;
        Some(decoded)
    }

    /// Current Viterbi path metric, a relative signal quality indicator.
    pub fn path_error(&self) -> i16 {
        self.vitdec.get_path_error(0)
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::database::entities::EepType;
    use crate::msc::time_deinterleaver::INTERLEAVE_DEPTH;

    fn make_subchannel() -> Subchannel {
        Subchannel {
            id: 1,
            start_address: 0,
            length: 6, // EEP 3-A with n=1, 8 kbit/s
            is_uep: false,
            eep_prot_level: 3,
            eep_type: EepType::A,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_inconsistent_protection_parameters() {
        let mut subchannel = make_subchannel();
        subchannel.length = 7;
        assert!(MscSubchannelDecoder::new(&subchannel).is_err());

        let mut subchannel = make_subchannel();
        subchannel.is_uep = true;
        subchannel.uep_prot_index = 80;
        assert!(MscSubchannelDecoder::new(&subchannel).is_err());
    }

    #[test]
    fn identical_cifs_round_trip_through_the_deinterleaver() {
        let subchannel = make_subchannel();
        let mut decoder = MscSubchannelDecoder::new(&subchannel).unwrap();
        assert_eq!(decoder.nb_decoded_bytes(), 24);

        let frame: Vec<u8> = (0u16..24).map(|i| (i * 11 + 5) as u8).collect();
        let soft_bits = encode_logical_frame(&frame, &decoder.schedule.clone());
        assert_eq!(soft_bits.len(), 6 * BITS_PER_CAPACITY_UNIT);

        // A constant stream is invariant under time interleaving
        let mut decoded = None;
        for _ in 0..INTERLEAVE_DEPTH {
            decoded = decoder.decode_cif(&soft_bits);
        }
        assert_eq!(decoded.unwrap(), frame);
    }
}
