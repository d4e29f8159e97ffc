use crate::io_buffers::{ReadBuffer, WriteBuffer};
use crate::ring_buffer::RingBuffer;
use std::sync::{Condvar, Mutex};

struct BufferState<T> {
    ring: RingBuffer<T>,
    is_closed: bool,
}

/// Single producer single consumer ring buffer with blocking transfers.
///
/// `read` blocks while the buffer is empty and open; `write` blocks while
/// it is full and open. Closing wakes both sides; operations after close
/// transfer what is possible and return short counts.
pub struct ThreadedRingBuffer<T> {
    state: Mutex<BufferState<T>>,
    on_reader: Condvar,
    on_writer: Condvar,
}

impl<T: Default + Copy> ThreadedRingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(BufferState {
                ring: RingBuffer::new(capacity),
                is_closed: false,
            }),
            on_reader: Condvar::new(),
            on_writer: Condvar::new(),
        }
    }

    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.is_closed = true;
        self.on_reader.notify_all();
        self.on_writer.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().is_closed
    }

    /// Blocks until `dest` is filled or the buffer closes. Returns the
    /// number of items transferred.
    pub fn read(&self, mut dest: &mut [T]) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut total_read = 0;
        loop {
            let length = state.ring.read(dest);
            total_read += length;
            dest = &mut dest[length..];
            if length > 0 {
                self.on_writer.notify_one();
            }
            if dest.is_empty() {
                break;
            }
            if state.is_closed {
                break;
            }
            state = self.on_reader.wait(state).unwrap();
        }
        total_read
    }

    /// Blocks until `src` is stored or the buffer closes. Returns the
    /// number of items transferred.
    pub fn write(&self, mut src: &[T]) -> usize {
        let mut state = self.state.lock().unwrap();
        let mut total_written = 0;
        loop {
            let length = state.ring.write(src);
            total_written += length;
            src = &src[length..];
            if length > 0 {
                self.on_reader.notify_one();
            }
            if src.is_empty() {
                break;
            }
            if state.is_closed {
                break;
            }
            state = self.on_writer.wait(state).unwrap();
        }
        total_written
    }
}

impl<T: Default + Copy> ReadBuffer<T> for &ThreadedRingBuffer<T> {
    fn read(&mut self, dest: &mut [T]) -> usize {
        ThreadedRingBuffer::read(self, dest)
    }
}

impl<T: Default + Copy> WriteBuffer<T> for &ThreadedRingBuffer<T> {
    fn write(&mut self, src: &[T]) -> usize {
        ThreadedRingBuffer::write(self, src)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn transfers_bytes_in_order_across_threads() {
        let buffer = Arc::new(ThreadedRingBuffer::<u8>::new(64));
        let total_bytes = 100_000usize;

        let writer = std::thread::spawn({
            let buffer = buffer.clone();
            move || {
                let mut value = 0u8;
                let mut chunk = [0u8; 37];
                let mut remaining = total_bytes;
                while remaining > 0 {
                    let length = chunk.len().min(remaining);
                    for entry in chunk[..length].iter_mut() {
                        *entry = value;
                        value = value.wrapping_add(1);
                    }
                    assert_eq!(buffer.write(&chunk[..length]), length);
                    remaining -= length;
                }
                buffer.close();
            }
        });

        let mut expected = 0u8;
        let mut total_read = 0usize;
        let mut chunk = [0u8; 53];
        loop {
            let length = buffer.read(&mut chunk);
            for &value in &chunk[..length] {
                assert_eq!(value, expected, "byte {} out of order", total_read);
                expected = expected.wrapping_add(1);
            }
            total_read += length;
            if length < chunk.len() {
                break;
            }
        }
        assert_eq!(total_read, total_bytes);
        writer.join().unwrap();
    }

    #[test]
    fn close_wakes_a_blocked_reader() {
        let buffer = Arc::new(ThreadedRingBuffer::<u8>::new(8));
        let reader = std::thread::spawn({
            let buffer = buffer.clone();
            move || {
                let mut dest = [0u8; 16];
                buffer.read(&mut dest)
            }
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        buffer.write(&[1, 2, 3]);
        buffer.close();
        let total_read = reader.join().unwrap();
        assert_eq!(total_read, 3);
    }

    #[test]
    fn close_wakes_a_blocked_writer() {
        let buffer = Arc::new(ThreadedRingBuffer::<u8>::new(4));
        let writer = std::thread::spawn({
            let buffer = buffer.clone();
            move || buffer.write(&[0u8; 16])
        });
        std::thread::sleep(std::time::Duration::from_millis(10));
        buffer.close();
        let total_written = writer.join().unwrap();
        assert_eq!(total_written, 4);
    }

    #[test]
    fn wrap_scenario_preserves_fifo_order() {
        let buffer = ThreadedRingBuffer::<u8>::new(8);
        assert_eq!(buffer.write(&[1, 2, 3, 4, 5, 6, 7, 8]), 8);
        let mut dest = [0u8; 4];
        assert_eq!(buffer.read(&mut dest), 4);
        assert_eq!(dest, [1, 2, 3, 4]);
        assert_eq!(buffer.write(&[9, 10, 11, 12]), 4);
        buffer.close();
        let mut dest = [0u8; 8];
        assert_eq!(buffer.read(&mut dest), 8);
        assert_eq!(dest, [5, 6, 7, 8, 9, 10, 11, 12]);
    }
}
