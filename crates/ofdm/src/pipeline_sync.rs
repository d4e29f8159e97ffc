//! Condition variable rendezvous for the OFDM demodulator pipeline.
//!
//! The processing thread takes the coordinator role and synchronises K
//! worker threads through these flags. Closing promotes every wait to a
//! terminal state so blocked threads observe shutdown and exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex};

/// A wait returned because the pipeline is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Closed;

struct Flag {
    is_set: Mutex<bool>,
    on_change: Condvar,
}

impl Flag {
    fn new() -> Self {
        Self {
            is_set: Mutex::new(false),
            on_change: Condvar::new(),
        }
    }

    fn signal(&self) {
        let mut is_set = self.is_set.lock().unwrap();
        *is_set = true;
        self.on_change.notify_all();
    }

    /// Blocks until signalled, then consumes the signal.
    fn wait(&self, is_terminated: &AtomicBool) -> Result<(), Closed> {
        let mut is_set = self.is_set.lock().unwrap();
        loop {
            if is_terminated.load(Ordering::Acquire) {
                return Err(Closed);
            }
            if *is_set {
                *is_set = false;
                return Ok(());
            }
            is_set = self.on_change.wait(is_set).unwrap();
        }
    }

    fn wake(&self) {
        let _guard = self.is_set.lock().unwrap();
        self.on_change.notify_all();
    }
}

/// Rendezvous state for one pipeline worker owning the contiguous symbol
/// range `[symbol_start, symbol_end)`.
pub struct PipelineWorkerSync {
    symbol_start: usize,
    symbol_end: usize,
    partial_phase_error: Mutex<f32>,
    start: Flag,
    phase_error_done: Flag,
    nco_ready: Flag,
    fft_done: Flag,
    end: Flag,
    is_terminated: AtomicBool,
}

impl PipelineWorkerSync {
    pub fn new(symbol_start: usize, symbol_end: usize) -> Self {
        Self {
            symbol_start,
            symbol_end,
            partial_phase_error: Mutex::new(0.0),
            start: Flag::new(),
            phase_error_done: Flag::new(),
            nco_ready: Flag::new(),
            fft_done: Flag::new(),
            end: Flag::new(),
            is_terminated: AtomicBool::new(false),
        }
    }

    pub fn symbol_start(&self) -> usize {
        self.symbol_start
    }

    pub fn symbol_end(&self) -> usize {
        self.symbol_end
    }

    pub fn is_stopped(&self) -> bool {
        self.is_terminated.load(Ordering::Acquire)
    }

    /// Promotes all waits to the terminal state. Safe to call repeatedly.
    pub fn stop(&self) {
        self.is_terminated.store(true, Ordering::Release);
        self.start.wake();
        self.phase_error_done.wake();
        self.nco_ready.wake();
        self.fft_done.wake();
        self.end.wake();
    }

    // Coordinator side
    pub fn signal_start(&self) {
        self.start.signal();
    }

    pub fn wait_phase_error_done(&self) -> Result<f32, Closed> {
        self.phase_error_done.wait(&self.is_terminated)?;
        Ok(*self.partial_phase_error.lock().unwrap())
    }

    pub fn signal_nco_ready(&self) {
        self.nco_ready.signal();
    }

    pub fn wait_end(&self) -> Result<(), Closed> {
        self.end.wait(&self.is_terminated)
    }

    // Worker side
    pub fn wait_start(&self) -> Result<(), Closed> {
        self.start.wait(&self.is_terminated)
    }

    pub fn post_phase_error(&self, partial: f32) {
        *self.partial_phase_error.lock().unwrap() = partial;
        self.phase_error_done.signal();
    }

    pub fn wait_nco_ready(&self) -> Result<(), Closed> {
        self.nco_ready.wait(&self.is_terminated)
    }

    /// Published once the worker's last FFT row is visible; consumed by the
    /// successor worker before its boundary DQPSK symbol.
    pub fn signal_fft_done(&self) {
        self.fft_done.signal();
    }

    pub fn wait_fft_done(&self) -> Result<(), Closed> {
        self.fft_done.wait(&self.is_terminated)
    }

    pub fn signal_end(&self) {
        self.end.signal();
    }
}
