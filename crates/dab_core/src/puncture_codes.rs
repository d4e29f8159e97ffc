//! Puncturing vectors and protection profiles for the DAB mother code.
//!
//! The rate 1/4 mother code is punctured down to the transmitted rate in
//! blocks of 128 mother bits. Each block uses one of 24 puncturing vectors
//! PI_1..PI_24 of 32 entries applied cyclically; vector PI_p transmits
//! 8 + p of every 32 mother bits. The final 24 mother bits produced by the
//! K-1 tail use their own vector.

/// Number of mother code bits covered by one application of a puncturing
/// vector.
pub const PUNCTURE_CODE_LENGTH: usize = 32;

/// Number of mother code bits in one puncturing block.
pub const PUNCTURE_BLOCK_BITS: usize = 128;

/// Mother bits produced by the K-1 zero tail bits.
pub const TAIL_MOTHER_BITS: usize = 24;

/// Puncturing vector applied to the 24 tail mother bits; half of them are
/// transmitted.
pub static PI_TAIL: [u8; TAIL_MOTHER_BITS] = [
    1, 1, 0, 0, 1, 1, 0, 0,
    1, 1, 0, 0, 1, 1, 0, 0,
    1, 1, 0, 0, 1, 1, 0, 0,
];

/// PI_1 through PI_24, indexed by `pi - 1`.
pub static PI_TABLE: [[u8; PUNCTURE_CODE_LENGTH]; 24] = [
    [1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    [1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    [1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,0,0,0, 1,0,0,0],
    [1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0],
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,0,0,0],
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0],
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,0,0,0],
    [1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    [1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    [1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    [1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,0,0, 1,1,0,0],
    [1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0],
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,0,0],
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0],
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,0,0],
    [1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    [1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    [1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    [1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,0, 1,1,1,0],
    [1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0],
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,0],
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0],
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,0],
    [1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1, 1,1,1,1],
];

/// Puncturing vector for index `pi` in 1..=24.
pub fn get_puncture_code(pi: usize) -> &'static [u8; PUNCTURE_CODE_LENGTH] {
    assert!((1..=24).contains(&pi), "Puncture index {} out of range 1..=24", pi);
    &PI_TABLE[pi - 1]
}

/// One step of a depuncturing schedule: `nb_mother_bits` mother bits pushed
/// through `code` cyclically.
#[derive(Debug, Clone, Copy)]
pub struct PunctureStep {
    pub code: &'static [u8],
    pub nb_mother_bits: usize,
}

impl PunctureStep {
    /// Number of transmitted bits this step consumes.
    pub fn nb_transmitted_bits(&self) -> usize {
        let ones: usize = self.code.iter().map(|&v| v as usize).sum();
        let full_cycles = self.nb_mother_bits / self.code.len();
        let remainder = self.nb_mother_bits % self.code.len();
        let remainder_ones: usize = self.code[..remainder].iter().map(|&v| v as usize).sum();
        full_cycles * ones + remainder_ones
    }
}

fn tail_step() -> PunctureStep {
    PunctureStep {
        code: &PI_TAIL,
        nb_mother_bits: TAIL_MOTHER_BITS,
    }
}

/// Depuncturing schedule of the fast information channel for one FIB group.
/// Groups of three FIBs (modes I, II, IV) use 21 blocks at PI_16 then 3 at
/// PI_15; the four FIB groups of mode III use 29 blocks at PI_16 instead.
/// The tail follows either way.
pub fn get_fic_puncture_schedule(nb_fibs_per_group: usize) -> [PunctureStep; 3] {
    let nb_pi_16_blocks = match nb_fibs_per_group {
        3 => 21,
        4 => 29,
        count => panic!("No FIC puncturing schedule for {} FIBs per group", count),
    };
    [
        PunctureStep {
            code: get_puncture_code(16),
            nb_mother_bits: PUNCTURE_BLOCK_BITS * nb_pi_16_blocks,
        },
        PunctureStep {
            code: get_puncture_code(15),
            nb_mother_bits: PUNCTURE_BLOCK_BITS * 3,
        },
        tail_step(),
    ]
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum EepType {
    #[default]
    A,
    B,
}

/// Equal error protection profile: `l1` blocks at PI `pi1`, then `l2` blocks
/// at PI `pi2`, then the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EepProfile {
    pub l1: usize,
    pub l2: usize,
    pub pi1: usize,
    pub pi2: usize,
}

impl EepProfile {
    pub fn puncture_schedule(&self) -> [PunctureStep; 3] {
        [
            PunctureStep {
                code: get_puncture_code(self.pi1),
                nb_mother_bits: PUNCTURE_BLOCK_BITS * self.l1,
            },
            PunctureStep {
                code: get_puncture_code(self.pi2),
                nb_mother_bits: PUNCTURE_BLOCK_BITS * self.l2,
            },
            tail_step(),
        ]
    }

    /// Logical frame bytes produced per CIF by this profile.
    pub fn nb_decoded_bytes(&self) -> usize {
        (self.l1 + self.l2) * PUNCTURE_BLOCK_BITS / CODE_RATE_BITS / 8
    }
}

const CODE_RATE_BITS: usize = 4;

/// Derives the EEP profile from the protection level (1..=4), option A or B,
/// and the subchannel size in capacity units. Returns None when the size is
/// not a valid multiple for that profile.
pub fn get_eep_profile(
    protection_level: u8,
    eep_type: EepType,
    subchannel_size_cu: usize,
) -> Option<EepProfile> {
    let size_multiple = match (eep_type, protection_level) {
        (EepType::A, 1) => 12,
        (EepType::A, 2) => 8,
        (EepType::A, 3) => 6,
        (EepType::A, 4) => 4,
        (EepType::B, 1) => 27,
        (EepType::B, 2) => 21,
        (EepType::B, 3) => 18,
        (EepType::B, 4) => 15,
        _ => return None,
    };
    if subchannel_size_cu == 0 || subchannel_size_cu % size_multiple != 0 {
        return None;
    }
    let n = subchannel_size_cu / size_multiple;

    let profile = match (eep_type, protection_level) {
        (EepType::A, 1) => EepProfile { l1: 6 * n - 3, l2: 3, pi1: 24, pi2: 23 },
        (EepType::A, 2) => {
            if n == 1 {
                EepProfile { l1: 5, l2: 1, pi1: 13, pi2: 12 }
            } else {
                EepProfile { l1: 2 * n - 3, l2: 4 * n + 3, pi1: 14, pi2: 13 }
            }
        }
        (EepType::A, 3) => EepProfile { l1: 6 * n - 3, l2: 3, pi1: 8, pi2: 7 },
        (EepType::A, 4) => EepProfile { l1: 4 * n - 3, l2: 2 * n + 3, pi1: 3, pi2: 2 },
        (EepType::B, 1) => EepProfile { l1: 24 * n - 3, l2: 3, pi1: 10, pi2: 9 },
        (EepType::B, 2) => EepProfile { l1: 24 * n - 3, l2: 3, pi1: 6, pi2: 5 },
        (EepType::B, 3) => EepProfile { l1: 24 * n - 3, l2: 3, pi1: 4, pi2: 3 },
        (EepType::B, 4) => EepProfile { l1: 24 * n - 3, l2: 3, pi1: 2, pi2: 1 },
        _ => return None,
    };
    Some(profile)
}

/// Unequal error protection profile for one table index of the standard's
/// protection table. The four (L, PI) pairs are applied in order, then the
/// tail; `total_padding_bits` transmitted filler bits follow and are skipped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UepProfile {
    pub bitrate_kbps: u32,
    pub protection_level: u8,
    pub l: [usize; 4],
    pub pi: [usize; 4],
    pub total_padding_bits: usize,
}

impl UepProfile {
    /// The (L, PI) pairs with L > 0, followed by the tail step.
    pub fn puncture_schedule(&self) -> Vec<PunctureStep> {
        let mut steps = Vec::with_capacity(5);
        for (&l, &pi) in self.l.iter().zip(self.pi.iter()) {
            if l == 0 {
                continue;
            }
            steps.push(PunctureStep {
                code: get_puncture_code(pi),
                nb_mother_bits: PUNCTURE_BLOCK_BITS * l,
            });
        }
        steps.push(tail_step());
        steps
    }

    /// Subchannel size in capacity units occupied by this profile.
    pub fn subchannel_size_cu(&self) -> usize {
        let transmitted: usize = self
            .puncture_schedule()
            .iter()
            .map(|step| step.nb_transmitted_bits())
            .sum();
        (transmitted + self.total_padding_bits) / 64
    }

    pub fn nb_decoded_bytes(&self) -> usize {
        let total_l: usize = self.l.iter().sum();
        total_l * PUNCTURE_BLOCK_BITS / CODE_RATE_BITS / 8
    }
}

/// Protection table for UEP audio subchannels, indexed by table index 1..=64.
#[rustfmt::skip]
pub static UEP_PROFILE_TABLE: [UepProfile; 64] = [
    UepProfile { bitrate_kbps:  32, protection_level: 5, l: [ 3,  4,  17, 0], pi: [ 5,  3,  2,  0], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 4, l: [ 3,  3,  18, 0], pi: [11,  6,  5,  0], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 3, l: [ 3,  4,  14, 3], pi: [15,  9,  6,  8], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 2, l: [ 3,  4,  14, 3], pi: [22, 13,  8, 13], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  32, protection_level: 1, l: [ 3,  5,  13, 3], pi: [24, 17, 12, 17], total_padding_bits: 4 },
    UepProfile { bitrate_kbps:  48, protection_level: 5, l: [ 4,  3,  26, 3], pi: [ 5,  4,  2,  3], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 4, l: [ 3,  4,  26, 3], pi: [ 9,  6,  4,  6], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 3, l: [ 3,  4,  26, 3], pi: [15, 10,  6,  9], total_padding_bits: 4 },
    UepProfile { bitrate_kbps:  48, protection_level: 2, l: [ 3,  4,  26, 3], pi: [24, 14,  8, 15], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  48, protection_level: 1, l: [ 3,  5,  25, 3], pi: [24, 18, 13, 18], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 5, l: [ 6, 10,  23, 3], pi: [ 5,  4,  2,  3], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 4, l: [ 6, 10,  23, 3], pi: [ 9,  6,  4,  5], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 3, l: [ 6, 12,  21, 3], pi: [16,  7,  6,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  56, protection_level: 2, l: [ 6, 10,  23, 3], pi: [23, 13,  8, 13], total_padding_bits: 8 },
    UepProfile { bitrate_kbps:  64, protection_level: 5, l: [ 6,  9,  31, 2], pi: [ 5,  3,  2,  3], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 4, l: [ 6,  9,  33, 0], pi: [11,  6,  5,  0], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 3, l: [ 6, 12,  27, 3], pi: [16,  8,  6,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  64, protection_level: 2, l: [ 6, 10,  29, 3], pi: [23, 13,  8, 13], total_padding_bits: 8 },
    UepProfile { bitrate_kbps:  64, protection_level: 1, l: [ 6, 11,  28, 3], pi: [24, 18, 12, 18], total_padding_bits: 4 },
    UepProfile { bitrate_kbps:  80, protection_level: 5, l: [ 6, 10,  41, 3], pi: [ 6,  3,  2,  3], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 4, l: [ 6, 10,  41, 3], pi: [11,  6,  5,  6], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 3, l: [ 6, 11,  40, 3], pi: [16,  8,  6,  7], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  80, protection_level: 2, l: [ 6, 10,  41, 3], pi: [23, 13,  8, 13], total_padding_bits: 8 },
    UepProfile { bitrate_kbps:  80, protection_level: 1, l: [ 6, 10,  41, 3], pi: [24, 17, 12, 18], total_padding_bits: 4 },
    UepProfile { bitrate_kbps:  96, protection_level: 5, l: [ 7,  9,  53, 3], pi: [ 5,  4,  2,  4], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 4, l: [ 7, 10,  52, 3], pi: [ 9,  6,  4,  6], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 3, l: [ 6, 12,  51, 3], pi: [16,  9,  6, 10], total_padding_bits: 4 },
    UepProfile { bitrate_kbps:  96, protection_level: 2, l: [ 6, 10,  53, 3], pi: [22, 12,  9, 12], total_padding_bits: 0 },
    UepProfile { bitrate_kbps:  96, protection_level: 1, l: [ 6, 13,  50, 3], pi: [24, 18, 13, 19], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 5, l: [14, 17,  50, 3], pi: [ 5,  4,  2,  5], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 4, l: [11, 21,  49, 3], pi: [ 9,  6,  4,  8], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 3, l: [11, 23,  47, 3], pi: [16,  8,  6,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 112, protection_level: 2, l: [11, 21,  49, 3], pi: [23, 12,  9, 14], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 128, protection_level: 5, l: [12, 19,  62, 3], pi: [ 5,  3,  2,  4], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 4, l: [11, 21,  61, 3], pi: [11,  6,  5,  7], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 3, l: [11, 22,  60, 3], pi: [16,  9,  6, 10], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 128, protection_level: 2, l: [11, 21,  61, 3], pi: [22, 12,  9, 14], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 128, protection_level: 1, l: [11, 20,  62, 3], pi: [24, 17, 13, 19], total_padding_bits: 8 },
    UepProfile { bitrate_kbps: 160, protection_level: 5, l: [11, 19,  87, 3], pi: [ 5,  4,  2,  4], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 4, l: [11, 23,  83, 3], pi: [11,  6,  5,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 3, l: [11, 24,  82, 3], pi: [16,  8,  6, 11], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 2, l: [11, 21,  85, 3], pi: [22, 11,  9, 13], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 160, protection_level: 1, l: [11, 22,  84, 3], pi: [24, 18, 12, 19], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 5, l: [11, 20, 110, 3], pi: [ 6,  4,  2,  5], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 4, l: [11, 22, 108, 3], pi: [10,  6,  4,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 3, l: [11, 24, 106, 3], pi: [16, 10,  6, 11], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 192, protection_level: 2, l: [11, 20, 110, 3], pi: [22, 13,  9, 13], total_padding_bits: 8 },
    UepProfile { bitrate_kbps: 192, protection_level: 1, l: [11, 21, 109, 3], pi: [24, 20, 13, 24], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 5, l: [12, 22, 131, 3], pi: [ 8,  6,  2,  6], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 224, protection_level: 4, l: [12, 26, 127, 3], pi: [12,  8,  4, 11], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 3, l: [11, 20, 134, 3], pi: [16, 10,  7,  9], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 2, l: [11, 22, 132, 3], pi: [24, 16, 10, 15], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 224, protection_level: 1, l: [11, 24, 130, 3], pi: [24, 20, 12, 20], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 256, protection_level: 5, l: [11, 24, 154, 3], pi: [ 6,  5,  2,  5], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 4, l: [11, 24, 154, 3], pi: [ 8,  7,  4,  7], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 3, l: [11, 27, 151, 3], pi: [16, 10,  7, 10], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 256, protection_level: 2, l: [11, 22, 156, 3], pi: [24, 14, 10, 13], total_padding_bits: 8 },
    UepProfile { bitrate_kbps: 256, protection_level: 1, l: [11, 26, 152, 3], pi: [24, 19, 14, 18], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 320, protection_level: 5, l: [11, 26, 200, 3], pi: [ 8,  5,  2,  6], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 320, protection_level: 4, l: [11, 25, 201, 3], pi: [13,  9,  5, 10], total_padding_bits: 8 },
    UepProfile { bitrate_kbps: 320, protection_level: 2, l: [11, 26, 200, 3], pi: [24, 17,  9, 17], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 384, protection_level: 5, l: [11, 27, 247, 3], pi: [ 8,  6,  2,  7], total_padding_bits: 0 },
    UepProfile { bitrate_kbps: 384, protection_level: 3, l: [11, 24, 250, 3], pi: [16,  9,  7, 10], total_padding_bits: 4 },
    UepProfile { bitrate_kbps: 384, protection_level: 1, l: [12, 28, 245, 3], pi: [24, 20, 14, 23], total_padding_bits: 8 },
];

/// Profile for a standard protection table index in 1..=64.
pub fn get_uep_profile(table_index: usize) -> Option<&'static UepProfile> {
    if !(1..=64).contains(&table_index) {
        return None;
    }
    Some(&UEP_PROFILE_TABLE[table_index - 1])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pi_vector_transmits_eight_plus_index_bits() {
        for (index, code) in PI_TABLE.iter().enumerate() {
            let pi = index + 1;
            let ones: usize = code.iter().map(|&v| v as usize).sum();
            assert_eq!(ones, 8 + pi, "PI_{}", pi);
        }
    }

    #[test]
    fn pi_vectors_are_nested() {
        // A stronger puncturing index only ever adds transmitted positions
        for pi in 1..24 {
            let weaker = get_puncture_code(pi);
            let stronger = get_puncture_code(pi + 1);
            for (a, b) in weaker.iter().zip(stronger.iter()) {
                assert!(b >= a, "PI_{} is not a superset of PI_{}", pi + 1, pi);
            }
        }
    }

    #[test]
    fn fic_schedule_covers_both_group_sizes() {
        // Three 32 byte FIBs arrive in 2304 transmitted bits
        let schedule = get_fic_puncture_schedule(3);
        let total: usize = schedule.iter().map(|step| step.nb_transmitted_bits()).sum();
        assert_eq!(total, 2304);
        let mother: usize = schedule.iter().map(|step| step.nb_mother_bits).sum();
        assert_eq!(mother / 4, 3 * 32 * 8 + 6);

        // Four FIBs (mode III) arrive in 3072 transmitted bits
        let schedule = get_fic_puncture_schedule(4);
        let total: usize = schedule.iter().map(|step| step.nb_transmitted_bits()).sum();
        assert_eq!(total, 3072);
        let mother: usize = schedule.iter().map(|step| step.nb_mother_bits).sum();
        assert_eq!(mother / 4, 4 * 32 * 8 + 6);
    }

    #[test]
    fn eep_profiles_fill_their_subchannel_exactly() {
        let cases = [
            (EepType::A, 1, 12),
            (EepType::A, 2, 8),
            (EepType::A, 3, 6),
            (EepType::A, 4, 4),
            (EepType::B, 1, 27),
            (EepType::B, 2, 21),
            (EepType::B, 3, 18),
            (EepType::B, 4, 15),
        ];
        for (eep_type, level, size_multiple) in cases {
            for n in 1..=8usize {
                let size_cu = size_multiple * n;
                let profile = get_eep_profile(level, eep_type, size_cu).unwrap();
                let transmitted: usize = profile
                    .puncture_schedule()
                    .iter()
                    .map(|step| step.nb_transmitted_bits())
                    .sum();
                assert_eq!(transmitted, size_cu * 64, "{:?} {}-x n={}", eep_type, level, n);
            }
        }
    }

    #[test]
    fn eep_profile_rejects_invalid_sizes() {
        assert!(get_eep_profile(1, EepType::A, 13).is_none());
        assert!(get_eep_profile(5, EepType::A, 12).is_none());
        assert!(get_eep_profile(1, EepType::A, 0).is_none());
    }

    #[test]
    fn uep_profiles_are_self_consistent() {
        for (index, profile) in UEP_PROFILE_TABLE.iter().enumerate() {
            let table_index = index + 1;
            let total_l: usize = profile.l.iter().sum();
            assert_eq!(
                total_l as u32,
                3 * profile.bitrate_kbps / 4,
                "table index {} block count",
                table_index
            );
            let transmitted: usize = profile
                .puncture_schedule()
                .iter()
                .map(|step| step.nb_transmitted_bits())
                .sum();
            assert_eq!(
                (transmitted + profile.total_padding_bits) % 64,
                0,
                "table index {} capacity alignment",
                table_index
            );
            // 24ms of audio at the table bitrate
            assert_eq!(
                profile.nb_decoded_bytes() as u32,
                profile.bitrate_kbps * 3,
                "table index {} logical frame size",
                table_index
            );
        }
    }

    #[test]
    fn uep_table_index_lookup() {
        assert!(get_uep_profile(0).is_none());
        assert!(get_uep_profile(65).is_none());
        let first = get_uep_profile(1).unwrap();
        assert_eq!(first.bitrate_kbps, 32);
        assert_eq!(first.subchannel_size_cu(), 16);
    }
}
