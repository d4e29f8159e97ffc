//! Decoders from quantised byte streams to complex baseband samples.
//!
//! Every supported encoding converts to `Complex32` with unity amplitude:
//! signed integers divide by their numeric maximum, unsigned integers
//! subtract mid scale and divide by it.

use crate::io_buffers::ReadBuffer;
use num::complex::Complex32;

/// Component encodings of a raw interleaved IQ stream, selectable through
/// the mode strings accepted by [`IqSampleFormat::from_mode_str`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IqSampleFormat {
    U8,
    S8,
    S16 { little_endian: bool },
    U16 { little_endian: bool },
    S32 { little_endian: bool },
    U32 { little_endian: bool },
    F32 { little_endian: bool },
    F64 { little_endian: bool },
}

/// Mode strings of all raw formats, for usage messages. The `wav` mode is
/// handled by the WAV reader instead.
pub const RAW_IQ_MODES: [&str; 14] = [
    "raw_u8", "raw_s8",
    "raw_s16l", "raw_s16b", "raw_u16l", "raw_u16b",
    "raw_s32l", "raw_s32b", "raw_u32l", "raw_u32b",
    "raw_f32l", "raw_f32b", "raw_f64l", "raw_f64b",
];

impl IqSampleFormat {
    pub fn from_mode_str(mode: &str) -> Option<Self> {
        let format = match mode {
            "raw_u8" => Self::U8,
            "raw_s8" => Self::S8,
            "raw_s16l" => Self::S16 { little_endian: true },
            "raw_s16b" => Self::S16 { little_endian: false },
            "raw_u16l" => Self::U16 { little_endian: true },
            "raw_u16b" => Self::U16 { little_endian: false },
            "raw_s32l" => Self::S32 { little_endian: true },
            "raw_s32b" => Self::S32 { little_endian: false },
            "raw_u32l" => Self::U32 { little_endian: true },
            "raw_u32b" => Self::U32 { little_endian: false },
            "raw_f32l" => Self::F32 { little_endian: true },
            "raw_f32b" => Self::F32 { little_endian: false },
            "raw_f64l" => Self::F64 { little_endian: true },
            "raw_f64b" => Self::F64 { little_endian: false },
            _ => return None,
        };
        Some(format)
    }

    pub fn bytes_per_component(&self) -> usize {
        match self {
            Self::U8 | Self::S8 => 1,
            Self::S16 { .. } | Self::U16 { .. } => 2,
            Self::S32 { .. } | Self::U32 { .. } | Self::F32 { .. } => 4,
            Self::F64 { .. } => 8,
        }
    }

    fn decode_component(&self, bytes: &[u8]) -> f32 {
        match *self {
            Self::U8 => (f32::from(bytes[0]) - U8_BIAS) / U8_BIAS,
            Self::S8 => f32::from(bytes[0] as i8) / (i8::MAX as f32),
            Self::S16 { little_endian } => {
                let value = i16::from_le_bytes([bytes[0], bytes[1]]);
                let value = if little_endian { value } else { value.swap_bytes() };
                f32::from(value) / (i16::MAX as f32)
            }
            Self::U16 { little_endian } => {
                let value = u16::from_le_bytes([bytes[0], bytes[1]]);
                let value = if little_endian { value } else { value.swap_bytes() };
                (value as f32 - U16_BIAS) / U16_BIAS
            }
            Self::S32 { little_endian } => {
                let value = i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let value = if little_endian { value } else { value.swap_bytes() };
                (value as f32) / (i32::MAX as f32)
            }
            Self::U32 { little_endian } => {
                let value = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                let value = if little_endian { value } else { value.swap_bytes() };
                (value as f32 - U32_BIAS) / U32_BIAS
            }
            Self::F32 { little_endian } => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                if little_endian {
                    f32::from_le_bytes(raw)
                } else {
                    f32::from_be_bytes(raw)
                }
            }
            Self::F64 { little_endian } => {
                let raw = [
                    bytes[0], bytes[1], bytes[2], bytes[3],
                    bytes[4], bytes[5], bytes[6], bytes[7],
                ];
                let value = if little_endian {
                    f64::from_le_bytes(raw)
                } else {
                    f64::from_be_bytes(raw)
                };
                value as f32
            }
        }
    }
}

const U8_BIAS: f32 = (u8::MAX as f32) / 2.0 + 0.5;
const U16_BIAS: f32 = (u16::MAX as f32) / 2.0 + 0.5;
const U32_BIAS: f32 = (u32::MAX as f32) / 2.0 + 0.5;

/// Decorator turning a quantised byte stream into complex samples.
pub struct RawIqReader<R> {
    inner: R,
    format: IqSampleFormat,
    scratch: Vec<u8>,
}

impl<R: ReadBuffer<u8>> RawIqReader<R> {
    pub fn new(inner: R, format: IqSampleFormat) -> Self {
        Self {
            inner,
            format,
            scratch: Vec::new(),
        }
    }
}

impl<R: ReadBuffer<u8>> ReadBuffer<Complex32> for RawIqReader<R> {
    fn read(&mut self, dest: &mut [Complex32]) -> usize {
        let stride = self.format.bytes_per_component() * 2;
        self.scratch.resize(dest.len() * stride, 0);
        let nb_bytes = self.inner.read(&mut self.scratch);
        // A trailing partial sample is dropped
        let nb_samples = nb_bytes / stride;
        for (sample, bytes) in dest.iter_mut().zip(self.scratch.chunks_exact(stride)) {
            let (i_bytes, q_bytes) = bytes.split_at(stride / 2);
            sample.re = self.format.decode_component(i_bytes);
            sample.im = self.format.decode_component(q_bytes);
        }
        nb_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_buffers::InputFile;

    fn decode(format: IqSampleFormat, bytes: Vec<u8>, nb_samples: usize) -> Vec<Complex32> {
        let mut reader = RawIqReader::new(InputFile::new(std::io::Cursor::new(bytes)), format);
        let mut dest = vec![Complex32::default(); nb_samples + 2];
        let total = reader.read(&mut dest);
        assert_eq!(total, nb_samples);
        dest.truncate(total);
        dest
    }

    #[test]
    fn unsigned_bytes_are_centred_on_mid_scale() {
        let samples = decode(IqSampleFormat::U8, vec![128, 128, 255, 0], 2);
        assert!(samples[0].re.abs() < 0.01);
        assert!(samples[0].im.abs() < 0.01);
        assert!((samples[1].re - 1.0).abs() < 0.01);
        assert!((samples[1].im + 1.0).abs() < 0.01);
    }

    #[test]
    fn signed_sixteen_bit_scales_by_numeric_max() {
        let value = 16384i16;
        let mut bytes = value.to_le_bytes().to_vec();
        bytes.extend_from_slice(&(-16384i16).to_le_bytes());
        let samples = decode(IqSampleFormat::S16 { little_endian: true }, bytes, 1);
        assert!((samples[0].re - 0.5).abs() < 0.001);
        assert!((samples[0].im + 0.5).abs() < 0.001);
    }

    #[test]
    fn big_endian_floats_round_trip() {
        let mut bytes = 0.75f32.to_be_bytes().to_vec();
        bytes.extend_from_slice(&(-0.25f32).to_be_bytes());
        let samples = decode(IqSampleFormat::F32 { little_endian: false }, bytes, 1);
        assert_eq!(samples[0], Complex32::new(0.75, -0.25));
    }

    #[test]
    fn partial_trailing_sample_is_dropped() {
        let samples = decode(IqSampleFormat::U8, vec![128, 128, 42], 1);
        assert_eq!(samples.len(), 1);
    }

    #[test]
    fn every_mode_string_resolves() {
        for mode in RAW_IQ_MODES {
            assert!(IqSampleFormat::from_mode_str(mode).is_some(), "{}", mode);
        }
        assert!(IqSampleFormat::from_mode_str("wav").is_none());
        assert!(IqSampleFormat::from_mode_str("raw_q7").is_none());
    }
}
