//! Capability contracts for sample streams.
//!
//! Sources and sinks implement the two small traits below; converting
//! readers are decorators that own their inner reader. A short read or
//! write signals the end of the stream or a closed buffer.

use std::io::{Read, Write};

pub trait ReadBuffer<T> {
    /// Fills as much of `dest` as possible. Returns the number of items
    /// read; less than `dest.len()` means the stream ended or closed.
    fn read(&mut self, dest: &mut [T]) -> usize;
}

pub trait WriteBuffer<T> {
    /// Writes as much of `src` as possible. Returns the number of items
    /// written; less than `src.len()` means the sink closed.
    fn write(&mut self, src: &[T]) -> usize;
}

/// Byte stream source over anything that implements [`std::io::Read`].
pub struct InputFile {
    inner: Box<dyn Read + Send>,
}

impl InputFile {
    pub fn new(inner: impl Read + Send + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }
}

impl ReadBuffer<u8> for InputFile {
    fn read(&mut self, dest: &mut [u8]) -> usize {
        let mut total_read = 0;
        while total_read < dest.len() {
            match self.inner.read(&mut dest[total_read..]) {
                Ok(0) => break,
                Ok(length) => total_read += length,
                Err(error) if error.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    log::error!(target: "io-buffers", "read failed: {}", error);
                    break;
                }
            }
        }
        total_read
    }
}

/// Byte stream sink over anything that implements [`std::io::Write`].
pub struct OutputFile {
    inner: Box<dyn Write + Send>,
}

impl OutputFile {
    pub fn new(inner: impl Write + Send + 'static) -> Self {
        Self { inner: Box::new(inner) }
    }
}

impl WriteBuffer<u8> for OutputFile {
    fn write(&mut self, src: &[u8]) -> usize {
        match self.inner.write_all(src) {
            Ok(()) => src.len(),
            Err(error) => {
                log::error!(target: "io-buffers", "write failed: {}", error);
                0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_file_reads_until_the_stream_ends() {
        let data: Vec<u8> = (0..100).collect();
        let mut input = InputFile::new(std::io::Cursor::new(data.clone()));
        let mut dest = vec![0u8; 64];
        assert_eq!(input.read(&mut dest), 64);
        assert_eq!(&dest[..], &data[..64]);
        assert_eq!(input.read(&mut dest), 36);
        assert_eq!(input.read(&mut dest), 0);
    }

    #[test]
    fn output_file_writes_everything() {
        use std::sync::{Arc, Mutex};

        #[derive(Clone)]
        struct SharedSink(Arc<Mutex<Vec<u8>>>);
        impl Write for SharedSink {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let sink = SharedSink(Arc::new(Mutex::new(Vec::new())));
        let mut output = OutputFile::new(sink.clone());
        assert_eq!(output.write(&[1, 2, 3]), 3);
        assert_eq!(*sink.0.lock().unwrap(), vec![1, 2, 3]);
    }
}
