use crate::viterbi_decoder::{CODE_RATE, CONSTRAINT_LENGTH, DAB_CONVOLUTIONAL_POLYS};

/// Rate 1/4 convolutional encoder for the DAB mother code.
///
/// The counterpart of the Viterbi decoder, used by the transmitter side test
/// helpers and the encode-decode properties. Input bytes are consumed msb
/// first. `encode_with_tail` appends the K-1 zero bits that drive the encoder
/// back to the zero state.
pub struct ConvolutionalEncoder {
    register: u8,
}

impl Default for ConvolutionalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConvolutionalEncoder {
    pub fn new() -> Self {
        Self { register: 0 }
    }

    pub fn reset(&mut self) {
        self.register = 0;
    }

    /// Encodes a single bit into CODE_RATE output bits.
    pub fn encode_bit(&mut self, bit: u8) -> [u8; CODE_RATE] {
        self.register = (self.register << 1) | (bit & 0b1);
        let mut out = [0u8; CODE_RATE];
        for (code_bit, poly) in out.iter_mut().zip(DAB_CONVOLUTIONAL_POLYS) {
            *code_bit = parity(self.register & poly);
        }
        out
    }

    /// Encodes whole bytes msb first and appends the K-1 zero tail bits.
    /// Returns one output bit per entry.
    pub fn encode_with_tail(&mut self, bytes: &[u8]) -> Vec<u8> {
        let nb_tail_bits = CONSTRAINT_LENGTH - 1;
        let nb_code_bits = (bytes.len() * 8 + nb_tail_bits) * CODE_RATE;
        let mut out = Vec::with_capacity(nb_code_bits);
        for &byte in bytes {
            for i in 0..8 {
                let bit = (byte >> (7 - i)) & 0b1;
                out.extend_from_slice(&self.encode_bit(bit));
            }
        }
        for _ in 0..nb_tail_bits {
            out.extend_from_slice(&self.encode_bit(0));
        }
        out
    }
}

fn parity(value: u8) -> u8 {
    (value.count_ones() & 0b1) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tail_returns_encoder_to_zero_state() {
        let mut encoder = ConvolutionalEncoder::new();
        let _ = encoder.encode_with_tail(&[0xA5, 0x17]);
        assert_eq!(encoder.register & 0b111111, 0);
    }

    #[test]
    fn output_length_matches_rate() {
        let mut encoder = ConvolutionalEncoder::new();
        let bits = encoder.encode_with_tail(&[0x5A, 0x3C]);
        assert_eq!(bits.len(), (16 + 6) * 4);
    }

    #[test]
    fn all_zero_input_yields_all_zero_code() {
        let mut encoder = ConvolutionalEncoder::new();
        let bits = encoder.encode_with_tail(&[0x00]);
        assert!(bits.iter().all(|&b| b == 0));
    }
}
