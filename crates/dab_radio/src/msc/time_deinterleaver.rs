use dab_core::viterbi_decoder::SoftDecisionBit;

/// Number of CIFs the time interleaving spreads each bit across.
pub const INTERLEAVE_DEPTH: usize = 16;

/// Per bit delay in CIFs, repeating every 16 bit positions.
pub const DELAY_TABLE: [usize; INTERLEAVE_DEPTH] = [0, 8, 4, 12, 2, 10, 6, 14, 1, 9, 5, 13, 3, 11, 7, 15];

/// Inverts the transmitter's time interleaving of one subchannel.
///
/// Soft bit `j` of the output block is taken from the CIF received
/// `DELAY_TABLE[j % 16]` frames ago, so the deinterleaver keeps a ring of
/// the last 16 CIF blocks and only produces output once the ring is primed.
pub struct TimeDeinterleaver {
    history: Vec<Vec<SoftDecisionBit>>,
    write_index: usize,
    total_blocks: usize,
    nb_bits: usize,
}

impl TimeDeinterleaver {
    pub fn new(nb_bits: usize) -> Self {
        Self {
            history: vec![vec![0; nb_bits]; INTERLEAVE_DEPTH],
            write_index: 0,
            total_blocks: 0,
            nb_bits,
        }
    }

    pub fn reset(&mut self) {
        self.total_blocks = 0;
        self.write_index = 0;
    }

    /// Feeds the subchannel's soft bits of one CIF. Returns the
    /// deinterleaved block once enough history has accumulated.
    pub fn push(&mut self, block: &[SoftDecisionBit]) -> Option<Vec<SoftDecisionBit>> {
        assert!(
            block.len() == self.nb_bits,
            "Subchannel block has {} bits but deinterleaver expects {}",
            block.len(),
            self.nb_bits,
        );
        self.history[self.write_index].copy_from_slice(block);
        self.total_blocks += 1;

        let output = if self.total_blocks >= INTERLEAVE_DEPTH {
            let mut out = vec![0; self.nb_bits];
            for (j, value) in out.iter_mut().enumerate() {
                let delay = DELAY_TABLE[j % INTERLEAVE_DEPTH];
                let index = (self.write_index + INTERLEAVE_DEPTH - delay) % INTERLEAVE_DEPTH;
                *value = self.history[index][j];
            }
            Some(out)
        } else {
            None
        };

        self.write_index = (self.write_index + 1) % INTERLEAVE_DEPTH;
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primes_for_sixteen_blocks_before_producing_output() {
        let mut deinterleaver = TimeDeinterleaver::new(32);
        for t in 0..INTERLEAVE_DEPTH - 1 {
            assert!(deinterleaver.push(&vec![t as SoftDecisionBit; 32]).is_none());
        }
        assert!(deinterleaver.push(&vec![15; 32]).is_some());
    }

    #[test]
    fn output_bit_j_comes_from_the_delayed_cif() {
        let nb_bits = 48;
        let mut deinterleaver = TimeDeinterleaver::new(nb_bits);
        let mut last = None;
        let total_blocks = 24;
        for t in 0..total_blocks {
            // Encode (time, bit index) uniquely in each soft bit
            let block: Vec<SoftDecisionBit> =
                (0..nb_bits).map(|j| (t * 100 + j) as SoftDecisionBit).collect();
            last = deinterleaver.push(&block);
        }
        let out = last.expect("deinterleaver is primed");
        let t = total_blocks - 1;
        for (j, &value) in out.iter().enumerate() {
            let delay = DELAY_TABLE[j % INTERLEAVE_DEPTH];
            let expected = ((t - delay) * 100 + j) as SoftDecisionBit;
            assert_eq!(value, expected, "bit {}", j);
        }
    }
}
