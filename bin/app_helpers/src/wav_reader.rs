//! RIFF/WAVE parsing for IQ recordings.
//!
//! Handles PCM at 8/16/24/32 bits, IEEE754 floats, G.711 A-law and mu-law,
//! the extensible format wrapper, the fact chunk of non PCM files and
//! unknown chunks before `data`. All samples convert to `f32`.

use crate::io_buffers::ReadBuffer;
use num::complex::Complex32;
use std::io::Read;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WavAudioFormat {
    Pcm,
    Ieee754Float,
    G711ALaw,
    G711MuLaw,
    Extensible,
}

impl WavAudioFormat {
    fn from_format_code(code: u16) -> Result<Self, WavError> {
        match code {
            0x0001 => Ok(Self::Pcm),
            0x0003 => Ok(Self::Ieee754Float),
            0x0006 => Ok(Self::G711ALaw),
            0x0007 => Ok(Self::G711MuLaw),
            0xFFFE => Ok(Self::Extensible),
            code => Err(WavError::UnknownFormatCode(code)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnhandledChunk {
    pub id: [u8; 4],
    pub size_bytes: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WavHeader {
    pub format: WavAudioFormat,
    pub total_channels: u16,
    pub samples_per_second: u32,
    pub average_bytes_per_second: u32,
    pub data_block_align_bytes: u16,
    pub bits_per_sample: u16,
    pub valid_bits_per_sample: Option<u16>,
    pub channel_mask: Option<u32>,
    pub total_samples_per_channel: Option<u32>,
    pub unhandled_chunks: Vec<UnhandledChunk>,
    pub data_chunk_size: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum WavError {
    #[error("insufficient bytes while reading {0}")]
    Truncated(&'static str),
    #[error("expected '{expected}' while reading {section}")]
    BadMagic { section: &'static str, expected: &'static str },
    #[error("invalid format chunk size {0}, expected 16, 18 or 40")]
    BadFormatChunkSize(u32),
    #[error("unknown wav audio format code {0:#06x}")]
    UnknownFormatCode(u16),
    #[error("expected mono or stereo but got {0} channels")]
    BadChannelCount(u16),
    #[error("extension field size {0} does not match the format chunk")]
    BadExtensionSize(u16),
    #[error("extensible subformat appears twice")]
    NestedExtensible,
    #[error("extensible format guid does not match the reference suffix")]
    BadSubformatGuid,
    #[error("fact chunk of {0} bytes is too small")]
    BadFactChunk(u32),
    #[error("unsupported {format:?} with {bits} bits per sample")]
    UnsupportedBitDepth { format: WavAudioFormat, bits: u16 },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

const REFERENCE_GUID_SUFFIX: [u8; 14] = [
    0x00, 0x00, 0x00, 0x00, 0x10, 0x00, 0x80, 0x00, 0x00, 0xAA, 0x00, 0x38, 0x9B, 0x71,
];

fn read_exact(reader: &mut impl Read, buf: &mut [u8], section: &'static str) -> Result<(), WavError> {
    reader.read_exact(buf).map_err(|error| {
        if error.kind() == std::io::ErrorKind::UnexpectedEof {
            WavError::Truncated(section)
        } else {
            WavError::Io(error)
        }
    })
}

fn read_u16(reader: &mut impl Read, section: &'static str) -> Result<u16, WavError> {
    let mut buf = [0u8; 2];
    read_exact(reader, &mut buf, section)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32(reader: &mut impl Read, section: &'static str) -> Result<u32, WavError> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, section)?;
    Ok(u32::from_le_bytes(buf))
}

fn skip_bytes(reader: &mut impl Read, nb_bytes: u64, section: &'static str) -> Result<(), WavError> {
    let copied = std::io::copy(&mut reader.take(nb_bytes), &mut std::io::sink())?;
    if copied != nb_bytes {
        return Err(WavError::Truncated(section));
    }
    Ok(())
}

/// Reads the header up to and including the `data` chunk preamble. The
/// reader is left positioned at the first sample byte.
pub fn read_wav_header(reader: &mut impl Read) -> Result<WavHeader, WavError> {
    // RIFF chunk
    let mut magic = [0u8; 4];
    read_exact(reader, &mut magic, "RIFF chunk")?;
    if &magic != b"RIFF" {
        return Err(WavError::BadMagic { section: "chunk id", expected: "RIFF" });
    }
    let _riff_chunk_size = read_u32(reader, "RIFF chunk")?;
    read_exact(reader, &mut magic, "RIFF chunk")?;
    if &magic != b"WAVE" {
        return Err(WavError::BadMagic { section: "wave id", expected: "WAVE" });
    }

    // Format chunk
    read_exact(reader, &mut magic, "format chunk")?;
    if &magic != b"fmt " {
        return Err(WavError::BadMagic { section: "format chunk id", expected: "fmt " });
    }
    let fmt_chunk_size = read_u32(reader, "format chunk")?;
    if fmt_chunk_size != 16 && fmt_chunk_size != 18 && fmt_chunk_size != 40 {
        return Err(WavError::BadFormatChunkSize(fmt_chunk_size));
    }

    let mut format = WavAudioFormat::from_format_code(read_u16(reader, "format code")?)?;
    let total_channels = read_u16(reader, "channel count")?;
    if total_channels != 1 && total_channels != 2 {
        return Err(WavError::BadChannelCount(total_channels));
    }
    let samples_per_second = read_u32(reader, "sample rate")?;
    let average_bytes_per_second = read_u32(reader, "byte rate")?;
    let data_block_align_bytes = read_u16(reader, "block align")?;
    let bits_per_sample = read_u16(reader, "bits per sample")?;

    let mut valid_bits_per_sample = None;
    let mut channel_mask = None;
    if fmt_chunk_size > 16 {
        let extension_field_size = read_u16(reader, "format extension")?;
        if u32::from(extension_field_size) != fmt_chunk_size - 18 {
            return Err(WavError::BadExtensionSize(extension_field_size));
        }
        if extension_field_size == 22 {
            valid_bits_per_sample = Some(read_u16(reader, "valid bits per sample")?);
            channel_mask = Some(read_u32(reader, "channel mask")?);
            let sub_format = WavAudioFormat::from_format_code(read_u16(reader, "subformat code")?)?;
            if sub_format == WavAudioFormat::Extensible {
                return Err(WavError::NestedExtensible);
            }
            format = sub_format;
            let mut guid_suffix = [0u8; 14];
            read_exact(reader, &mut guid_suffix, "subformat guid")?;
            if guid_suffix != REFERENCE_GUID_SUFFIX {
                return Err(WavError::BadSubformatGuid);
            }
        }
    }

    // Fact chunk for non PCM formats
    let mut total_samples_per_channel = None;
    if format != WavAudioFormat::Pcm {
        read_exact(reader, &mut magic, "fact chunk")?;
        if &magic != b"fact" {
            return Err(WavError::BadMagic { section: "fact chunk id", expected: "fact" });
        }
        let fact_chunk_size = read_u32(reader, "fact chunk")?;
        if fact_chunk_size < 4 {
            return Err(WavError::BadFactChunk(fact_chunk_size));
        }
        total_samples_per_channel = Some(read_u32(reader, "fact chunk data")?);
        skip_bytes(reader, u64::from(fact_chunk_size - 4), "fact chunk data")?;
    }

    // Skip unknown chunks until the data chunk
    let mut unhandled_chunks = Vec::new();
    let data_chunk_size = loop {
        read_exact(reader, &mut magic, "data chunk")?;
        let chunk_size = read_u32(reader, "data chunk")?;
        if &magic == b"data" {
            break chunk_size;
        }
        skip_bytes(reader, u64::from(chunk_size), "unknown chunk")?;
        unhandled_chunks.push(UnhandledChunk { id: magic, size_bytes: chunk_size });
    };

    Ok(WavHeader {
        format,
        total_channels,
        samples_per_second,
        average_bytes_per_second,
        data_block_align_bytes,
        bits_per_sample,
        valid_bits_per_sample,
        channel_mask,
        total_samples_per_channel,
        unhandled_chunks,
        data_chunk_size,
    })
}

type SampleParser = fn(&[u8]) -> f32;

fn parse_pcm8(bytes: &[u8]) -> f32 {
    const BIAS: f32 = (u8::MAX as f32) / 2.0;
    (f32::from(bytes[0]) - BIAS) / BIAS
}

fn parse_pcm16(bytes: &[u8]) -> f32 {
    f32::from(i16::from_le_bytes([bytes[0], bytes[1]])) / (i16::MAX as f32)
}

fn parse_pcm24(bytes: &[u8]) -> f32 {
    let mut value = i32::from(bytes[0]) | (i32::from(bytes[1]) << 8) | (i32::from(bytes[2]) << 16);
    // sign extend 24bit negative to 32bit negative for 2's complement
    if value & 0x80_00_00 != 0 {
        value |= !0xFF_FF_FF;
    }
    (value as f32) / (0x7F_FF_FF as f32)
}

fn parse_pcm32(bytes: &[u8]) -> f32 {
    (i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f32) / (i32::MAX as f32)
}

fn parse_f32(bytes: &[u8]) -> f32 {
    f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

fn parse_f64(bytes: &[u8]) -> f32 {
    f64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]) as f32
}

fn parse_a_law(bytes: &[u8]) -> f32 {
    let value = bytes[0] ^ 0b01010101;
    let is_negative = value & 0x80 == 0;
    let exponent = (value >> 4) & 0b111;
    let mantissa = i16::from(value & 0b1111);
    let mut decoded: i16 = (mantissa << 1) | 0b1;
    if exponent > 0 {
        decoded |= 0b1 << 5;
    }
    if exponent > 1 {
        decoded <<= exponent - 1;
    }
    if is_negative {
        decoded = -decoded;
    }
    f32::from(decoded) / 4096.0
}

fn parse_mu_law(bytes: &[u8]) -> f32 {
    let value = !bytes[0];
    let is_negative = value & 0x80 != 0;
    let exponent = (value >> 4) & 0b111;
    let mantissa = i16::from(value & 0b1111);
    let mut decoded: i16 = ((0b1 << 5) | (mantissa << 1) | 0b1) << exponent;
    decoded -= 33;
    if is_negative {
        decoded = -decoded;
    }
    f32::from(decoded) / 8192.0
}

fn select_parser(header: &WavHeader) -> Result<(SampleParser, usize), WavError> {
    let unsupported = || WavError::UnsupportedBitDepth {
        format: header.format,
        bits: header.bits_per_sample,
    };
    match header.format {
        WavAudioFormat::Pcm => match header.bits_per_sample {
            8 => Ok((parse_pcm8 as SampleParser, 1)),
            16 => Ok((parse_pcm16 as SampleParser, 2)),
            24 => Ok((parse_pcm24 as SampleParser, 3)),
            32 => Ok((parse_pcm32 as SampleParser, 4)),
            _ => Err(unsupported()),
        },
        WavAudioFormat::Ieee754Float => match header.bits_per_sample {
            32 => Ok((parse_f32 as SampleParser, 4)),
            64 => Ok((parse_f64 as SampleParser, 8)),
            _ => Err(unsupported()),
        },
        WavAudioFormat::G711ALaw => match header.bits_per_sample {
            8 => Ok((parse_a_law as SampleParser, 1)),
            _ => Err(unsupported()),
        },
        WavAudioFormat::G711MuLaw => match header.bits_per_sample {
            8 => Ok((parse_mu_law as SampleParser, 1)),
            _ => Err(unsupported()),
        },
        WavAudioFormat::Extensible => Err(unsupported()),
    }
}

/// Streaming sample reader over the data chunk of a WAV stream.
pub struct WavFileReader {
    inner: Box<dyn Read + Send>,
    header: WavHeader,
    parser: SampleParser,
    bytes_per_sample: usize,
    scratch: Vec<u8>,
    total_bytes_read: u64,
}

impl WavFileReader {
    pub fn new(mut inner: impl Read + Send + 'static) -> Result<Self, WavError> {
        let header = read_wav_header(&mut inner)?;
        let (parser, bytes_per_sample) = select_parser(&header)?;
        Ok(Self {
            inner: Box::new(inner),
            header,
            parser,
            bytes_per_sample,
            scratch: Vec::new(),
            total_bytes_read: 0,
        })
    }

    pub fn header(&self) -> &WavHeader {
        &self.header
    }
}

impl ReadBuffer<f32> for WavFileReader {
    fn read(&mut self, dest: &mut [f32]) -> usize {
        let remaining_bytes = u64::from(self.header.data_chunk_size) - self.total_bytes_read;
        let max_samples = (remaining_bytes / self.bytes_per_sample as u64) as usize;
        let nb_requested = dest.len().min(max_samples);
        if nb_requested == 0 {
            return 0;
        }

        self.scratch.resize(nb_requested * self.bytes_per_sample, 0);
        let mut nb_bytes = 0;
        while nb_bytes < self.scratch.len() {
            match self.inner.read(&mut self.scratch[nb_bytes..]) {
                Ok(0) => break,
                Ok(length) => nb_bytes += length,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    log::error!(target: "wav-reader", "read failed: {}", error);
                    break;
                }
            }
        }
        self.total_bytes_read += nb_bytes as u64;

        let nb_samples = nb_bytes / self.bytes_per_sample;
        for (sample, bytes) in dest
            .iter_mut()
            .zip(self.scratch.chunks_exact(self.bytes_per_sample))
            .take(nb_samples)
        {
            *sample = (self.parser)(bytes);
        }
        nb_samples
    }
}

/// Adapts a stereo WAV stream into complex IQ samples.
pub struct WavIqReader {
    inner: WavFileReader,
    scratch: Vec<f32>,
}

#[derive(Debug, thiserror::Error)]
pub enum WavIqError {
    #[error("IQ stream requires 2 channels but the file has {0}")]
    NotStereo(u16),
    #[error(transparent)]
    Wav(#[from] WavError),
}

impl WavIqReader {
    pub fn new(inner: impl Read + Send + 'static) -> Result<Self, WavIqError> {
        let inner = WavFileReader::new(inner)?;
        if inner.header().total_channels != 2 {
            return Err(WavIqError::NotStereo(inner.header().total_channels));
        }
        Ok(Self { inner, scratch: Vec::new() })
    }

    pub fn header(&self) -> &WavHeader {
        &self.inner.header
    }
}

impl ReadBuffer<Complex32> for WavIqReader {
    fn read(&mut self, dest: &mut [Complex32]) -> usize {
        self.scratch.resize(dest.len() * 2, 0.0);
        let nb_components = self.inner.read(&mut self.scratch);
        let nb_samples = nb_components / 2;
        for (sample, pair) in dest.iter_mut().zip(self.scratch.chunks_exact(2)) {
            sample.re = pair[0];
            sample.im = pair[1];
        }
        nb_samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_wav(
        format_code: u16,
        channels: u16,
        bits: u16,
        data: &[u8],
        extra_chunk: Option<(&[u8; 4], &[u8])>,
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"RIFF");
        buf.extend_from_slice(&0u32.to_le_bytes()); // size patched later
        buf.extend_from_slice(b"WAVE");

        buf.extend_from_slice(b"fmt ");
        let is_pcm = format_code == 0x0001;
        let fmt_size: u32 = if is_pcm { 16 } else { 18 };
        buf.extend_from_slice(&fmt_size.to_le_bytes());
        buf.extend_from_slice(&format_code.to_le_bytes());
        buf.extend_from_slice(&channels.to_le_bytes());
        buf.extend_from_slice(&2_048_000u32.to_le_bytes());
        let block_align = channels * bits / 8;
        buf.extend_from_slice(&(2_048_000u32 * u32::from(block_align)).to_le_bytes());
        buf.extend_from_slice(&block_align.to_le_bytes());
        buf.extend_from_slice(&bits.to_le_bytes());
        if !is_pcm {
            buf.extend_from_slice(&0u16.to_le_bytes()); // empty extension
            buf.extend_from_slice(b"fact");
            buf.extend_from_slice(&4u32.to_le_bytes());
            let nb_samples = (data.len() as u32) / u32::from(block_align);
            buf.extend_from_slice(&nb_samples.to_le_bytes());
        }

        if let Some((id, chunk)) = extra_chunk {
            buf.extend_from_slice(id);
            buf.extend_from_slice(&(chunk.len() as u32).to_le_bytes());
            buf.extend_from_slice(chunk);
        }

        buf.extend_from_slice(b"data");
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);

        let riff_size = (buf.len() - 8) as u32;
        buf[4..8].copy_from_slice(&riff_size.to_le_bytes());
        buf
    }

    #[test]
    fn parses_a_pcm16_stereo_header() {
        let data: Vec<u8> = [1000i16, -1000, 2000, -2000]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let wav = make_wav(0x0001, 2, 16, &data, None);
        let mut reader = WavIqReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.header().format, WavAudioFormat::Pcm);
        assert_eq!(reader.header().samples_per_second, 2_048_000);

        let mut dest = vec![Complex32::default(); 4];
        let nb_samples = reader.read(&mut dest);
        assert_eq!(nb_samples, 2);
        assert!((dest[0].re - 1000.0 / 32767.0).abs() < 1e-6);
        assert!((dest[0].im + 1000.0 / 32767.0).abs() < 1e-6);
    }

    #[test]
    fn skips_unknown_chunks_before_data() {
        let data = [128u8, 128, 255, 0];
        let wav = make_wav(0x0001, 2, 8, &data, Some((b"LIST", &[9, 9, 9, 9, 9, 9])));
        let reader = WavIqReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.header().unhandled_chunks.len(), 1);
        assert_eq!(&reader.header().unhandled_chunks[0].id, b"LIST");
    }

    #[test]
    fn float_format_requires_a_fact_chunk() {
        let data: Vec<u8> = [0.5f32, -0.5, 0.25, -0.25]
            .iter()
            .flat_map(|v| v.to_le_bytes())
            .collect();
        let wav = make_wav(0x0003, 2, 32, &data, None);
        let mut reader = WavIqReader::new(std::io::Cursor::new(wav)).unwrap();
        assert_eq!(reader.header().total_samples_per_channel, Some(1));

        let mut dest = vec![Complex32::default(); 2];
        assert_eq!(reader.read(&mut dest), 2);
        assert_eq!(dest[0], Complex32::new(0.5, -0.5));
    }

    #[test]
    fn mono_file_is_rejected_for_iq() {
        let wav = make_wav(0x0001, 1, 16, &[0, 0], None);
        assert!(matches!(
            WavIqReader::new(std::io::Cursor::new(wav)),
            Err(WavIqError::NotStereo(1))
        ));
    }

    #[test]
    fn bad_magic_is_reported() {
        let wav = b"RIFX0000WAVE".to_vec();
        let mut cursor = std::io::Cursor::new(wav);
        assert!(matches!(
            read_wav_header(&mut cursor),
            Err(WavError::BadMagic { expected: "RIFF", .. })
        ));
    }

    #[test]
    fn unsupported_bit_depth_is_a_configuration_error() {
        let wav = make_wav(0x0001, 2, 12, &[0; 6], None);
        assert!(matches!(
            WavFileReader::new(std::io::Cursor::new(wav)),
            Err(WavError::UnsupportedBitDepth { bits: 12, .. })
        ));
    }

    #[test]
    fn mu_law_decodes_to_signed_samples() {
        // 0xFF encodes the smallest positive step in mu-law
        let data = [0xFFu8, 0x7F, 0x80, 0x00];
        let wav = make_wav(0x0007, 2, 8, &data, None);
        let mut reader = WavIqReader::new(std::io::Cursor::new(wav)).unwrap();
        let mut dest = vec![Complex32::default(); 2];
        assert_eq!(reader.read(&mut dest), 2);
        assert!(dest[0].re.abs() < 0.01);
        assert!(dest[0].im.abs() < 0.01);
        assert!(dest[1].re > 0.9);
        assert!(dest[1].im < -0.9);
    }
}
