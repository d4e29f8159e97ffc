//! Reed-Solomon codec over GF(2^8) with field generator 0x11D, after
//! Phil Karn's libfec. The codec is parameterised on the number of parity
//! roots, first consecutive root, primitive element and shortening pad so
//! the same core serves the DAB+ super-frame subfield code RS(120,110) and
//! the packet mode outer code RS(204,188).

const NN: usize = 255;
/// Sentinel log value representing the zero field element.
const A0: usize = NN;
const GF_POLY: u32 = 0x11D;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsError {
    /// More errors than the parity can correct.
    Uncorrectable,
}

impl std::fmt::Display for RsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RsError::Uncorrectable => write!(f, "uncorrectable reed-solomon codeword"),
        }
    }
}

impl std::error::Error for RsError {}

pub struct ReedSolomon {
    alpha_to: [u8; NN + 1],
    index_of: [usize; NN + 1],
    genpoly: Vec<usize>,
    nroots: usize,
    fcr: usize,
    prim: usize,
    iprim: usize,
    pad: usize,
}

impl ReedSolomon {
    /// `pad` is the shortening amount: the codeword spans `255 - pad` symbols
    /// of which the last `nroots` are parity.
    pub fn new(fcr: usize, prim: usize, nroots: usize, pad: usize) -> Self {
        assert!(nroots > 0 && nroots < NN);
        assert!(pad < NN - nroots);

        let mut alpha_to = [0u8; NN + 1];
        let mut index_of = [0usize; NN + 1];
        index_of[0] = A0;
        alpha_to[A0] = 0;
        let mut sr: u32 = 1;
        for i in 0..NN {
            index_of[sr as usize] = i;
            alpha_to[i] = sr as u8;
            sr <<= 1;
            if sr & 0x100 != 0 {
                sr ^= GF_POLY;
            }
            sr &= 0xFF;
        }

        // Primitive element raised to the inverse of prim, used to map Chien
        // search positions back to codeword locations
        let mut iprim = 1usize;
        while iprim % prim != 0 {
            iprim += NN;
        }
        iprim /= prim;

        // Generator polynomial with roots alpha^((fcr+i)*prim), built by
        // repeated multiplication with (x + alpha^root)
        let mut genpoly = vec![0usize; nroots + 1];
        genpoly[0] = 1;
        let mut root = fcr * prim;
        for i in 0..nroots {
            genpoly[i + 1] = 1;
            for j in (1..=i).rev() {
                if genpoly[j] != 0 {
                    genpoly[j] = genpoly[j - 1]
                        ^ alpha_to[modnn(index_of[genpoly[j]] + root)] as usize;
                } else {
                    genpoly[j] = genpoly[j - 1];
                }
            }
            genpoly[0] = alpha_to[modnn(index_of[genpoly[0]] + root)] as usize;
            root += prim;
        }
        for coefficient in genpoly.iter_mut() {
            *coefficient = index_of[*coefficient];
        }

        Self {
            alpha_to,
            index_of,
            genpoly,
            nroots,
            fcr,
            prim,
            iprim,
            pad,
        }
    }

    /// RS(120,110) applied across DAB+ audio super-frames.
    pub fn dab_plus_super_frame() -> Self {
        Self::new(0, 1, 10, NN - 120)
    }

    /// RS(204,188) outer code of MSC packet mode FEC.
    pub fn packet_mode() -> Self {
        Self::new(0, 1, 16, NN - 204)
    }

    pub fn nb_parity_symbols(&self) -> usize {
        self.nroots
    }

    pub fn nb_data_symbols(&self) -> usize {
        NN - self.pad - self.nroots
    }

    /// Computes parity for `data` (`nb_data_symbols` long) into `parity`.
    pub fn encode(&self, data: &[u8], parity: &mut [u8]) {
        assert!(data.len() == self.nb_data_symbols());
        assert!(parity.len() == self.nroots);
        parity.fill(0);
        for &symbol in data {
            let feedback = self.index_of[(symbol ^ parity[0]) as usize];
            if feedback != A0 {
                for j in 1..self.nroots {
                    parity[j] ^= self.alpha_to[modnn(feedback + self.genpoly[self.nroots - j])];
                }
            }
            parity.rotate_left(1);
            parity[self.nroots - 1] = if feedback != A0 {
                self.alpha_to[modnn(feedback + self.genpoly[0])]
            } else {
                0
            };
        }
    }

    /// Corrects a codeword of `nb_data_symbols + nroots` bytes in place.
    /// Returns the number of corrected symbols.
    pub fn decode(&self, codeword: &mut [u8]) -> Result<usize, RsError> {
        assert!(codeword.len() == NN - self.pad);
        let nroots = self.nroots;

        // Syndromes in polynomial form via Horner evaluation
        let mut syndromes = vec![0usize; nroots];
        for (i, syndrome) in syndromes.iter_mut().enumerate() {
            let mut value = codeword[0] as usize;
            let root = (self.fcr + i) * self.prim;
            for &symbol in &codeword[1..] {
                value = if value == 0 {
                    symbol as usize
                } else {
                    (symbol as usize) ^ self.alpha_to[modnn(self.index_of[value] + root)] as usize
                };
            }
            *syndrome = value;
        }

        if syndromes.iter().all(|&s| s == 0) {
            return Ok(0);
        }
        for syndrome in syndromes.iter_mut() {
            *syndrome = self.index_of[*syndrome];
        }

        // Berlekamp-Massey for the error locator polynomial
        let mut lambda = vec![0usize; nroots + 1];
        lambda[0] = 1;
        let mut b: Vec<usize> = lambda.iter().map(|&v| self.index_of[v]).collect();
        let mut el = 0usize;
        for r in 1..=nroots {
            let mut discrepancy = 0usize;
            for i in 0..r {
                if lambda[i] != 0 && syndromes[r - i - 1] != A0 {
                    discrepancy ^= self.alpha_to
                        [modnn(self.index_of[lambda[i]] + syndromes[r - i - 1])]
                        as usize;
                }
            }
            let discrepancy = self.index_of[discrepancy];
            if discrepancy == A0 {
                b.rotate_right(1);
                b[0] = A0;
            } else {
                let mut t = vec![0usize; nroots + 1];
                t[0] = lambda[0];
                for i in 0..nroots {
                    t[i + 1] = lambda[i + 1]
                        ^ if b[i] != A0 {
                            self.alpha_to[modnn(discrepancy + b[i])] as usize
                        } else {
                            0
                        };
                }
                if 2 * el <= r - 1 {
                    el = r - el;
                    for (b_entry, &lambda_entry) in b.iter_mut().zip(lambda.iter()) {
                        *b_entry = if lambda_entry == 0 {
                            A0
                        } else {
                            modnn(self.index_of[lambda_entry] + NN - discrepancy)
                        };
                    }
                } else {
                    b.rotate_right(1);
                    b[0] = A0;
                }
                lambda = t;
            }
        }

        let mut deg_lambda = 0usize;
        let mut lambda_index = vec![A0; nroots + 1];
        for (i, &coefficient) in lambda.iter().enumerate() {
            lambda_index[i] = self.index_of[coefficient];
            if lambda_index[i] != A0 {
                deg_lambda = i;
            }
        }

        // Chien search for the roots of lambda
        let mut reg = lambda_index.clone();
        let mut roots = Vec::with_capacity(nroots);
        let mut locations = Vec::with_capacity(nroots);
        let mut k = self.iprim - 1;
        for i in 1..=NN {
            let mut q = 1usize;
            for j in (1..=deg_lambda).rev() {
                if reg[j] != A0 {
                    reg[j] = modnn(reg[j] + j);
                    q ^= self.alpha_to[reg[j]] as usize;
                }
            }
            if q == 0 {
                roots.push(i);
                locations.push(k);
                if roots.len() == deg_lambda {
                    break;
                }
            }
            k = modnn(k + self.iprim);
        }
        if roots.len() != deg_lambda {
            return Err(RsError::Uncorrectable);
        }

        // Error evaluator omega = syndromes * lambda mod x^nroots
        let deg_omega = deg_lambda.saturating_sub(1);
        let mut omega = vec![A0; nroots + 1];
        for i in 0..=deg_omega {
            let mut tmp = 0usize;
            for j in (0..=i).rev() {
                if syndromes[i - j] != A0 && lambda_index[j] != A0 {
                    tmp ^= self.alpha_to[modnn(syndromes[i - j] + lambda_index[j])] as usize;
                }
            }
            omega[i] = self.index_of[tmp];
        }

        // Forney algorithm for the error magnitudes
        let mut nb_corrected = 0usize;
        for j in (0..roots.len()).rev() {
            let mut num1 = 0usize;
            for i in (0..=deg_omega).rev() {
                if omega[i] != A0 {
                    num1 ^= self.alpha_to[modnn(omega[i] + i * roots[j])] as usize;
                }
            }
            let num2 = self.alpha_to[modnn(roots[j] * (self.fcr + NN - 1) + NN)] as usize;
            let mut den = 0usize;
            let start = deg_lambda.min(nroots - 1) & !1;
            let mut i = start as isize;
            while i >= 0 {
                let index = i as usize;
                if lambda_index[index + 1] != A0 {
                    den ^= self.alpha_to[modnn(lambda_index[index + 1] + index * roots[j])]
                        as usize;
                }
                i -= 2;
            }
            if den == 0 {
                return Err(RsError::Uncorrectable);
            }
            if num1 != 0 {
                if locations[j] < self.pad {
                    return Err(RsError::Uncorrectable);
                }
                let magnitude = self.alpha_to[modnn(
                    self.index_of[num1] + self.index_of[num2] + NN - self.index_of[den],
                )];
                codeword[locations[j] - self.pad] ^= magnitude;
                nb_corrected += 1;
            }
        }
        Ok(nb_corrected)
    }
}

fn modnn(mut x: usize) -> usize {
    while x >= NN {
        x -= NN;
        x = (x >> 8) + (x & NN);
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn make_codeword(rs: &ReedSolomon, rng: &mut StdRng) -> (Vec<u8>, Vec<u8>) {
        let data: Vec<u8> = (0..rs.nb_data_symbols()).map(|_| rng.gen()).collect();
        let mut parity = vec![0u8; rs.nb_parity_symbols()];
        rs.encode(&data, &mut parity);
        let mut codeword = data.clone();
        codeword.extend_from_slice(&parity);
        (data, codeword)
    }

    #[test]
    fn clean_codeword_needs_no_correction() {
        let rs = ReedSolomon::dab_plus_super_frame();
        let mut rng = StdRng::seed_from_u64(1);
        let (_, mut codeword) = make_codeword(&rs, &mut rng);
        assert_eq!(rs.decode(&mut codeword), Ok(0));
    }

    #[test]
    fn corrects_up_to_five_byte_errors_in_super_frame_code() {
        let rs = ReedSolomon::dab_plus_super_frame();
        let mut rng = StdRng::seed_from_u64(2);
        for nb_errors in 1..=5usize {
            let (data, mut codeword) = make_codeword(&rs, &mut rng);
            let mut positions = std::collections::HashSet::new();
            while positions.len() < nb_errors {
                positions.insert(rng.gen_range(0..codeword.len()));
            }
            for &position in &positions {
                codeword[position] ^= rng.gen_range(1..=255u8);
            }
            let corrected = rs.decode(&mut codeword).unwrap();
            assert_eq!(corrected, nb_errors);
            assert_eq!(&codeword[..data.len()], &data[..]);
        }
    }

    #[test]
    fn six_byte_errors_never_silently_restore_the_message() {
        let rs = ReedSolomon::dab_plus_super_frame();
        let mut rng = StdRng::seed_from_u64(3);
        let (data, mut codeword) = make_codeword(&rs, &mut rng);
        let mut positions = std::collections::HashSet::new();
        while positions.len() < 6 {
            positions.insert(rng.gen_range(0..codeword.len()));
        }
        for &position in &positions {
            codeword[position] ^= rng.gen_range(1..=255u8);
        }
        match rs.decode(&mut codeword) {
            Err(RsError::Uncorrectable) => {}
            Ok(_) => assert_ne!(&codeword[..data.len()], &data[..]),
        }
    }

    #[test]
    fn packet_mode_instance_corrects_eight_errors() {
        let rs = ReedSolomon::packet_mode();
        assert_eq!(rs.nb_data_symbols(), 188);
        let mut rng = StdRng::seed_from_u64(4);
        let (data, mut codeword) = make_codeword(&rs, &mut rng);
        for offset in 0..8usize {
            codeword[offset * 20] ^= 0x5A;
        }
        let corrected = rs.decode(&mut codeword).unwrap();
        assert_eq!(corrected, 8);
        assert_eq!(&codeword[..data.len()], &data[..]);
    }
}
