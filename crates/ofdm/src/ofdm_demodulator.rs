use crate::circular_bucket::CircularBucket;
use crate::dsp;
use crate::linear_bucket::LinearBucket;
use crate::ofdm_frame_buffer::OfdmFrameBuffer;
use crate::ofdm_parameters::OfdmParameters;
use crate::pipeline_sync::PipelineWorkerSync;
use itertools::izip;
use num::complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::cell::UnsafeCell;
use std::cmp::Ordering;
use std::ops::Range;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

/// Soft decision output bit of the demodulator.
///
/// Offset binary: [`SOFT_BIT_LOW`] is a confident logical 0 and
/// [`SOFT_BIT_HIGH`] a confident logical 1.
pub type SoftBit = i16;

pub const SOFT_BIT_HIGH: SoftBit = 256;
pub const SOFT_BIT_LOW: SoftBit = 0;

/// Symbol buffers are padded so each FFT portion starts on this boundary.
pub const FRAME_BUFFER_ALIGN_BYTES: usize = 32;

#[derive(Debug)]
pub struct OfdmDemodulatorSettings {
    /// The rate at which to update the L1 power average of the signal.
    /// This is a number from 0 to 1 where 1 is the fastest update rate.
    pub null_power_update_beta: f32,
    /// The number of samples in a block to calculate the L1 power average
    pub null_power_total_samples: usize,
    /// The number of blocks we stride where we only analyse one block.
    pub null_power_decimation_factor: usize,
    /// The amount of the L1 power average that the signal needs to fall below to detect the start of the NULL symbol.
    pub null_power_threshold_start: f32,
    /// The amount of the L1 power average that the signal needs to rise above to detect the end of the NULL symbol.
    pub null_power_threshold_end: f32,
    /// The number of frame lengths the NULL search may run without finding a
    /// power dip before its partial detection state is discarded.
    pub null_search_timeout_frames: usize,
    /// The rate to update the fine frequency offset during each OFDM frame.
    /// Fine frequency offsets are smaller than the frequency spacing of one FFT bin.
    /// This is a number from 0 to 1 where 1 is the fastest update rate.
    pub fine_frequency_update_beta: f32,
    /// Whether we perform coarse frequency correction.
    /// Coarse frequency offsets are larger than the frequency spacing of one FFT bin.
    pub coarse_frequency_is_enabled: bool,
    /// The maximum coarse frequency offset the coarse frequency correction step should search for.
    /// This is a number from 0 to 1 where 1 is normalised to half the sampling frequency.
    pub coarse_frequency_max_range: f32,
    /// The rate to update the coarse frequency offset during each OFDM frame.
    /// This is only used when the coarse frequency offset changes in small amounts after a stable period.
    /// This is a number from 0 to 1 where 1 is the fastest update rate.
    pub coarse_frequency_slow_update_beta: f32,
    /// During fine time correction we generate an impulse response, where the highest peak is considered the start of our phase reference symbol (PRS).
    /// This is the required height for the impulse peak to be considered valid as the start of the PRS.
    pub fine_time_impulse_peak_threshold_db: f32,
    /// This is the amount to weigh the height of the impulse peak based on its distance from the expected location.
    /// We assume that after the NULL symbol detection step that the PRS will be situated roughly in the correct position.
    /// Therefore to prevent spurious locks onto peaks that are far away from the expected position due to noise, we lower the perceived height of the peak the further away it is.
    pub fine_time_impulse_peak_distance_probability: f32,
    /// Number of pipeline workers for the per symbol processing.
    /// Defaults to the available hardware parallelism capped by the number of symbols.
    pub nb_pipeline_threads: Option<usize>,
}

impl Default for OfdmDemodulatorSettings {
    fn default() -> Self {
        Self {
            null_power_update_beta: 0.95,
            null_power_total_samples: 100,
            null_power_decimation_factor: 5,
            null_power_threshold_start: 0.35,
            null_power_threshold_end: 0.75,
            null_search_timeout_frames: 2,
            fine_frequency_update_beta: 0.95,
            coarse_frequency_is_enabled: true,
            coarse_frequency_max_range: 0.1,
            coarse_frequency_slow_update_beta: 0.1,
            fine_time_impulse_peak_threshold_db: 20.0,
            fine_time_impulse_peak_distance_probability: 0.15,
            nb_pipeline_threads: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OfdmDemodulatorState {
    /// Finding the NULL symbol by analysing the average L1 power of blocks in the signal
    FindingNullPowerDip,
    /// Once the NULL symbol has been detected we read the NULL and PRS symbol
    ReadingNullAndPrs,
    /// Compensating for large frequency offsets that are greater than one FFT bin
    RunningCoarseFrequencySynchronisation,
    /// Compensating for sample offsets where we detected our NULL and PRS symbols.
    /// This step can fail if the impulse peak is too weak or too far away from our expected location.
    /// When this occurs the demodulator will go back to finding the NULL symbol through L1 power analysis.
    RunningFineTimeSync,
    /// Once the NULL and PRS symbol have been read we read in the rest of the OFDM frame.
    ReadingSymbols,
    /// Once the OFDM frame has been read the pipeline workers process the symbols.
    /// This includes fine frequency compensation, the FFT, DQPSK demodulation and data carrier remapping.
    ProcessingSymbols,
}

/// Storage handed out in raw slices to the pipeline workers.
///
/// Safety invariant: the rendezvous protocol in [`SymbolPipeline`] ensures a
/// range is either accessed by exactly one thread, or that all writes to it
/// happened before the rendezvous that precedes a read.
struct SharedBuffer<T> {
    data: UnsafeCell<Vec<T>>,
}

unsafe impl<T: Send> Sync for SharedBuffer<T> {}

impl<T: Default + Clone> SharedBuffer<T> {
    fn new(length: usize) -> Self {
        Self {
            data: UnsafeCell::new(vec![T::default(); length]),
        }
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn slice_mut(&self, range: Range<usize>) -> &mut [T] {
        &mut (&mut *self.data.get())[range]
    }

    unsafe fn slice(&self, range: Range<usize>) -> &[T] {
        &(&*self.data.get())[range]
    }
}

struct PipelineShared {
    params: OfdmParameters,
    layout: OfdmFrameBuffer,
    carrier_mapper: Vec<usize>,
    frame: SharedBuffer<Complex32>,
    fft_buffer: SharedBuffer<Complex32>,
    dqpsk_buffer: SharedBuffer<Complex32>,
    bits_buffer: SharedBuffer<SoftBit>,
    /// Net frequency offset published by the coordinator before NCO_READY.
    nco_frequency_offset: Mutex<f32>,
}

/// The per symbol worker pool. One coordinator (the thread driving
/// [`OfdmDemodulator::process`]) and K workers, each owning a contiguous
/// range of symbol indices.
struct SymbolPipeline {
    shared: Arc<PipelineShared>,
    workers: Vec<Arc<PipelineWorkerSync>>,
    threads: Vec<JoinHandle<()>>,
}

impl SymbolPipeline {
    fn new(
        params: &OfdmParameters,
        layout: OfdmFrameBuffer,
        carrier_mapper: &[usize],
        nb_threads: Option<usize>,
    ) -> Self {
        let nb_hardware_threads = std::thread::available_parallelism()
            .map(|value| value.get())
            .unwrap_or(1);
        let nb_workers = nb_threads
            .unwrap_or(nb_hardware_threads)
            .clamp(1, params.nb_symbols);

        let shared = Arc::new(PipelineShared {
            params: *params,
            layout,
            carrier_mapper: carrier_mapper.to_vec(),
            frame: SharedBuffer::new(layout.total_samples()),
            fft_buffer: SharedBuffer::new(params.nb_symbols * params.nb_fft),
            dqpsk_buffer: SharedBuffer::new(params.nb_output_samples),
            bits_buffer: SharedBuffer::new(params.nb_output_bits),
            nco_frequency_offset: Mutex::new(0.0),
        });

        // Contiguous near equal partition of the symbol indices
        let mut workers = Vec::with_capacity(nb_workers);
        let base = params.nb_symbols / nb_workers;
        let remainder = params.nb_symbols % nb_workers;
        let mut start = 0;
        for index in 0..nb_workers {
            let length = base + usize::from(index < remainder);
            workers.push(Arc::new(PipelineWorkerSync::new(start, start + length)));
            start += length;
        }

        let mut threads = Vec::with_capacity(nb_workers);
        for index in 0..nb_workers {
            let shared = shared.clone();
            let sync = workers[index].clone();
            let predecessor = (index > 0).then(|| workers[index - 1].clone());
            threads.push(std::thread::spawn(move || {
                pipeline_worker_main(shared, sync, predecessor);
            }));
        }

        Self {
            shared,
            workers,
            threads,
        }
    }

    fn is_stopped(&self) -> bool {
        self.workers.iter().any(|sync| sync.is_stopped())
    }

    fn stop(&self) {
        for sync in &self.workers {
            sync.stop();
        }
    }

    /// Coordinator access to the frame storage. Only valid between frames,
    /// while no worker is running.
    fn with_frame_mut<R>(&mut self, callback: impl FnOnce(&mut [Complex32]) -> R) -> R {
        let total = self.shared.layout.total_samples();
        let frame = unsafe { self.shared.frame.slice_mut(0..total) };
        callback(frame)
    }

    fn frame_slice(&self, range: Range<usize>) -> &[Complex32] {
        unsafe { self.shared.frame.slice(range) }
    }

    /// Runs the four phase rendezvous over one frame. Returns the average
    /// cyclic prefix phase error, or None when the pipeline was stopped.
    fn process_frame(&mut self, net_frequency_offset: impl FnOnce(f32) -> f32) -> Option<f32> {
        for sync in &self.workers {
            sync.signal_start();
        }

        let mut total_phase_error = 0.0f32;
        for sync in &self.workers {
            total_phase_error += sync.wait_phase_error_done().ok()?;
        }
        let average_phase_error = total_phase_error / (self.shared.params.nb_symbols as f32);

        let offset = net_frequency_offset(average_phase_error);
        *self.shared.nco_frequency_offset.lock().unwrap() = offset;
        for sync in &self.workers {
            sync.signal_nco_ready();
        }

        for sync in &self.workers {
            sync.wait_end().ok()?;
        }
        Some(average_phase_error)
    }

    /// The soft bits of the last processed frame. Only valid after
    /// `process_frame` returned and before the next frame starts.
    fn output_bits(&self) -> &[SoftBit] {
        unsafe { self.shared.bits_buffer.slice(0..self.shared.params.nb_output_bits) }
    }
}

impl Drop for SymbolPipeline {
    fn drop(&mut self) {
        self.stop();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

fn pipeline_worker_main(
    shared: Arc<PipelineShared>,
    sync: Arc<PipelineWorkerSync>,
    predecessor: Option<Arc<PipelineWorkerSync>>,
) {
    let params = shared.params;
    let layout = shared.layout;
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(params.nb_fft);
    let start = sync.symbol_start();
    let end = sync.symbol_end();

    loop {
        if sync.wait_start().is_err() {
            break;
        }

        // Phase 1: partial cyclic prefix correlation over the raw symbols
        let mut total_phase_error = 0.0f32;
        for i in start..end {
            let symbol = unsafe { shared.frame.slice(layout.data_symbol_range(i)) };
            total_phase_error += dsp::calculate_cyclic_phase_error(symbol, params.nb_cyclic_prefix);
        }
        sync.post_phase_error(total_phase_error);

        // Phase 2: frequency correction and FFT once the NCO is published
        if sync.wait_nco_ready().is_err() {
            break;
        }
        let frequency_offset = *shared.nco_frequency_offset.lock().unwrap();
        for i in start..end {
            let symbol = unsafe { shared.frame.slice_mut(layout.data_symbol_range(i)) };
            dsp::apply_pll(symbol, frequency_offset, layout.symbol_time_offset(i));
            let fft_out = unsafe {
                shared
                    .fft_buffer
                    .slice_mut(chunk_slice(i, params.nb_fft))
            };
            fft_out.copy_from_slice(&symbol[params.nb_cyclic_prefix..]);
            fft.process(fft_out);
        }
        sync.signal_fft_done();

        // Phase 3: DQPSK needs the predecessor's boundary FFT
        if let Some(predecessor) = &predecessor {
            if predecessor.wait_fft_done().is_err() {
                break;
            }
        }
        for i in start.max(1)..end {
            let x0 = unsafe { shared.fft_buffer.slice(chunk_slice(i - 1, params.nb_fft)) };
            let x1 = unsafe { shared.fft_buffer.slice(chunk_slice(i, params.nb_fft)) };
            let dqpsk = unsafe {
                shared
                    .dqpsk_buffer
                    .slice_mut(chunk_slice(i - 1, params.nb_fft_data_carriers))
            };
            calculate_dqpsk(&params, x0, x1, dqpsk);

            let bits = unsafe {
                shared
                    .bits_buffer
                    .slice_mut(chunk_slice(i - 1, params.nb_fft_data_carriers * 2))
            };
            calculate_soft_bits(&shared.carrier_mapper, dqpsk, bits);
        }
        sync.signal_end();
    }
}

pub struct OfdmDemodulator {
    pub state: OfdmDemodulatorState,
    pub settings: OfdmDemodulatorSettings,
    pub params: OfdmParameters,
    /// The number of OFDM frames read successfully.
    pub total_frames_read: u32,
    /// The number of OFDM frames that desynced if the detected NULL and PRS symbols are too offset in time.
    pub total_frames_desync: u32,
    /// The number of times the NULL power search ran for longer than the
    /// timeout without finding a dip and discarded its partial state.
    pub total_null_search_resets: u32,
    is_found_coarse_frequency_offset: bool,
    /// The current coarse frequency offset normalised to the sampling frequency.
    pub coarse_frequency_offset: f32,
    /// The current fine frequency offset normalised to the sampling frequency.
    pub fine_frequency_offset: f32,
    /// The number of samples the incoming OFDM frame is offset by in time.
    pub fine_time_offset: isize,
    is_null_start_found: bool,
    is_null_end_found: bool,
    null_search_total_samples: usize,
    /// The current L1 signal average of the receiving signal.
    pub signal_l1_average: f32,
    // fft used by the synchronisation steps on the coordinator thread
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    temp_fft_buffer: Vec<Complex32>,
    // reference data
    correlation_prs_fft_data: Vec<Complex32>,
    correlation_prs_time_data: Vec<Complex32>,
    // buffers
    null_power_dip_buffer: CircularBucket<Complex32>,
    /// The buffer that holds the current predicted NULL and PRS symbols.
    pub null_prs_buffer: LinearBucket<Complex32>,
    /// The buffer that holds the fine time impulse response buffer.
    /// There should be one dominant peak and many small sidelobes since this is the output of correlation in time.
    pub fine_time_impulse_response_buffer: Vec<f32>,
    /// The buffer that holds the coarse frequency impulse response buffer.
    /// There should be multiple peaks with the largest peak indicating the coarse frequency offset.
    /// The spacing between each sample indicates a frequency difference of one FFT bin.
    pub coarse_frequency_impulse_response_buffer: Vec<f32>,
    frame_fill: OfdmFrameBuffer,
    pipeline: SymbolPipeline,
    bits_out_callbacks: Vec<Box<dyn FnMut(&[SoftBit]) + Send + Sync + 'static>>,
}

impl OfdmDemodulator {
    pub fn new(params: &OfdmParameters, carrier_mapper: &[usize], prs_fft: &[Complex32]) -> Self {
        Self::with_settings(params, carrier_mapper, prs_fft, OfdmDemodulatorSettings::default())
    }

    pub fn with_settings(
        params: &OfdmParameters,
        carrier_mapper: &[usize],
        prs_fft: &[Complex32],
        settings: OfdmDemodulatorSettings,
    ) -> Self {
        assert!(
            params.nb_fft_data_carriers == carrier_mapper.len(),
            "Mismatching number of data carriers between params {} and lookup table {}",
            params.nb_fft_data_carriers,
            carrier_mapper.len()
        );
        assert!(
            params.nb_fft == prs_fft.len(),
            "Mismatching FFT size between params {} and FFT buffer {}",
            params.nb_fft,
            prs_fft.len()
        );

        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(params.nb_fft);
        let ifft = planner.plan_fft_inverse(params.nb_fft);

        let frame_fill = OfdmFrameBuffer::new(params, FRAME_BUFFER_ALIGN_BYTES);
        let pipeline = SymbolPipeline::new(
            params,
            frame_fill,
            carrier_mapper,
            settings.nb_pipeline_threads,
        );

        let mut demodulator = Self {
            state: OfdmDemodulatorState::FindingNullPowerDip,
            settings,
            params: *params,
            total_frames_read: 0,
            total_frames_desync: 0,
            total_null_search_resets: 0,
            is_found_coarse_frequency_offset: false,
            coarse_frequency_offset: 0.0,
            fine_frequency_offset: 0.0,
            fine_time_offset: 0,
            is_null_start_found: false,
            is_null_end_found: false,
            null_search_total_samples: 0,
            signal_l1_average: 0.0,
            fft,
            ifft,
            temp_fft_buffer: vec![Complex32::default(); params.nb_fft],
            correlation_prs_fft_data: vec![Complex32::default(); params.nb_fft],
            correlation_prs_time_data: vec![Complex32::default(); params.nb_fft],
            null_power_dip_buffer: CircularBucket::<Complex32>::new(params.nb_null_period),
            null_prs_buffer: LinearBucket::<Complex32>::new(
                params.nb_null_period + params.nb_symbol_period,
            ),
            fine_time_impulse_response_buffer: vec![0.0; params.nb_fft],
            coarse_frequency_impulse_response_buffer: vec![0.0; params.nb_fft],
            frame_fill,
            pipeline,
            bits_out_callbacks: vec![],
        };

        demodulator.init(prs_fft);
        demodulator
    }

    fn init(&mut self, prs_fft: &[Complex32]) {
        self.correlation_prs_time_data.copy_from_slice(prs_fft);
        dsp::calculate_relative_phase(&mut self.correlation_prs_time_data);
        self.ifft.process(&mut self.correlation_prs_time_data);

        // Correlation in either time or frequency domain requires the conjugate product in the opposite domain
        // Used in coarse frequency correction
        for value in &mut self.correlation_prs_time_data {
            *value = value.conj();
        }
        // Used in fine time correction
        for i in 0..self.params.nb_fft {
            self.correlation_prs_fft_data[i] = prs_fft[i].conj();
        }
    }

    /// Registers a callback invoked with the soft decision bits of every
    /// successfully demodulated OFDM frame.
    pub fn subscribe_bits_out(&mut self, callback: impl FnMut(&[SoftBit]) + Send + Sync + 'static) {
        self.bits_out_callbacks.push(Box::new(callback));
    }

    /// Promotes the pipeline rendezvous to a terminal state. Any in flight
    /// frame is abandoned; worker threads are joined on drop.
    pub fn stop(&mut self) {
        self.pipeline.stop();
    }

    /// Consumes an array of complex samples from the receiver and passes it through the demodulator.
    pub fn process(&mut self, buf: &[Complex32]) {
        if self.pipeline.is_stopped() {
            return;
        }
        self.update_signal_power_average(buf);

        let mut curr_buf = buf;
        while !curr_buf.is_empty() {
            let total_read = match self.state {
                OfdmDemodulatorState::FindingNullPowerDip => self.find_null_power_dip(curr_buf),
                OfdmDemodulatorState::ReadingNullAndPrs => self.read_null_prs(curr_buf),
                OfdmDemodulatorState::RunningCoarseFrequencySynchronisation => {
                    self.run_coarse_frequency_synchronisation();
                    0
                }
                OfdmDemodulatorState::RunningFineTimeSync => {
                    self.run_fine_time_sync();
                    0
                }
                OfdmDemodulatorState::ReadingSymbols => self.read_symbols(curr_buf),
                OfdmDemodulatorState::ProcessingSymbols => {
                    self.process_symbols();
                    if self.pipeline.is_stopped() {
                        return;
                    }
                    0
                }
            };
            curr_buf = &curr_buf[total_read..];
        }
    }

    fn reset_from_desync(&mut self) {
        self.state = OfdmDemodulatorState::FindingNullPowerDip;
        self.null_prs_buffer.reset();

        // NOTE: We also reset fine frequency synchronisation since an incorrect value
        // can reduce performance of fine time synchronisation using the impulse response
        self.signal_l1_average = 0.0;
        self.is_found_coarse_frequency_offset = false;
        self.fine_frequency_offset = 0.0;
        self.coarse_frequency_offset = 0.0;
        self.fine_time_offset = 0;
        self.null_search_total_samples = 0;
    }

    fn find_null_power_dip(&mut self, buf: &[Complex32]) -> usize {
        // Clause 3.12.2 - Frame synchronisation using power detection
        // we run this if we dont have an initial estimate for the prs index
        // This can occur if:
        //      1. We just started the demodulator and need a quick estimate of OFDM start
        //      2. The PRS impulse response didn't have a sufficiently large peak

        let null_start_threshold = self.signal_l1_average * self.settings.null_power_threshold_start;
        let null_end_threshold = self.signal_l1_average * self.settings.null_power_threshold_end;

        // We analyse the average power of the signal in blocks
        let block_size = self.settings.null_power_total_samples;
        let mut total_read = 0;
        for block in buf.chunks_exact(block_size) {
            let l1_average = dsp::calculate_l1_average(block);
            total_read += block_size;
            if self.is_null_start_found {
                if l1_average > null_end_threshold {
                    self.is_null_end_found = true;
                    break;
                }
            } else if l1_average < null_start_threshold {
                self.is_null_start_found = true;
            }
        }

        // We ignore the remaining buffer until there are enough samples for analysis
        if !self.is_null_end_found {
            self.null_power_dip_buffer.consume(buf, true);
            self.update_null_search_timeout(buf.len());
            return buf.len();
        }

        // Copy null symbol into correlation buffer
        // This is done since our captured null symbol may actually contain parts of the PRS
        // We do this so we can guarantee the full start of the PRS is attained after fine time sync
        let consumed_blocks = &buf[..total_read];
        self.null_power_dip_buffer.consume(consumed_blocks, true);
        self.null_prs_buffer.reset();
        self.null_prs_buffer
            .consume_from_iterator(self.null_power_dip_buffer.iter().copied());

        self.is_null_start_found = false;
        self.is_null_end_found = false;
        self.null_search_total_samples = 0;
        self.null_power_dip_buffer.reset();
        self.state = OfdmDemodulatorState::ReadingNullAndPrs;

        total_read
    }

    fn update_null_search_timeout(&mut self, nb_samples: usize) {
        self.null_search_total_samples += nb_samples;
        let timeout =
            self.settings.null_search_timeout_frames * self.params.nb_input_samples;
        if self.null_search_total_samples <= timeout {
            return;
        }
        // The partial detection was a false positive, start over
        log::warn!(
            target: "ofdm-demod",
            "null search ran for {} samples without a dip, restarting",
            self.null_search_total_samples,
        );
        self.is_null_start_found = false;
        self.is_null_end_found = false;
        self.null_search_total_samples = 0;
        self.total_null_search_resets += 1;
    }

    fn read_null_prs(&mut self, buf: &[Complex32]) -> usize {
        let total_read = self.null_prs_buffer.consume(buf);
        if self.null_prs_buffer.is_full() {
            self.state = OfdmDemodulatorState::RunningCoarseFrequencySynchronisation;
        }
        total_read
    }

    fn run_coarse_frequency_synchronisation(&mut self) {
        // Clause: 3.13.2 Integral frequency offset estimation
        if !self.settings.coarse_frequency_is_enabled {
            self.coarse_frequency_offset = 0.0;
            self.state = OfdmDemodulatorState::RunningFineTimeSync;
            return;
        }

        let prs = &self.null_prs_buffer[span_slice(self.params.nb_null_period, self.params.nb_symbol_period)];
        let prs_fft = &prs[self.params.nb_cyclic_prefix..];

        // To mitigate effect of phase shifts we instead correlate the complex difference between consecutive FFT bins
        // arg(~z0*z1) = arg(z1)-arg(z0)
        self.temp_fft_buffer.copy_from_slice(prs_fft);
        self.fft.process(&mut self.temp_fft_buffer);
        dsp::calculate_relative_phase(&mut self.temp_fft_buffer);
        self.ifft.process(&mut self.temp_fft_buffer);

        // Correlation in frequency domain is multiplication in time domain
        // NOTE: PRS time data is already conjugate in self.init()
        for (x, y) in izip!(
            self.correlation_prs_time_data.iter().take(self.params.nb_fft),
            self.temp_fft_buffer.iter_mut().take(self.params.nb_fft),
        ) {
            *y *= *x;
        }
        self.fft.process(&mut self.temp_fft_buffer);
        dsp::calculate_magnitude_spectrum(
            &self.temp_fft_buffer,
            &mut self.coarse_frequency_impulse_response_buffer,
        );

        assert!(self.settings.coarse_frequency_max_range < 1.0);
        let dc_bin = (self.params.nb_fft / 2) as i32;
        let max_carrier_offset_bins =
            (0.5 * self.settings.coarse_frequency_max_range * self.params.nb_fft as f32).floor() as i32;
        let carrier_offset_bin = (-max_carrier_offset_bins..=max_carrier_offset_bins)
            .map(|offset| {
                let fft_bin = offset + dc_bin;
                let value: f32 = self.coarse_frequency_impulse_response_buffer[fft_bin as usize];
                (offset, value)
            })
            .max_by(|(_, x), (_, y)| {
                if x > y {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            })
            .map(|(offset, _)| offset)
            .unwrap_or(0);

        let current_coarse_frequency_offset: f32 =
            (-carrier_offset_bin as f32) / (self.params.nb_fft as f32);
        let delta_coarse_frequency_offset =
            current_coarse_frequency_offset - self.coarse_frequency_offset;

        let large_offset_bin: f32 = 1.5;
        let large_offset_threshold = large_offset_bin / (self.params.nb_fft as f32);
        let is_large_offset = delta_coarse_frequency_offset.abs() > large_offset_threshold;

        let is_fast_update = is_large_offset || !self.is_found_coarse_frequency_offset;
        let update_beta: f32 = match is_fast_update {
            true => 1.0,
            false => self.settings.coarse_frequency_slow_update_beta,
        };
        let delta = update_beta * delta_coarse_frequency_offset;

        self.is_found_coarse_frequency_offset = true;
        self.coarse_frequency_offset += delta;
        self.update_fine_frequency_offset(-delta);
        self.state = OfdmDemodulatorState::RunningFineTimeSync;
    }

    fn run_fine_time_sync(&mut self) {
        let prs_data = &self.null_prs_buffer[span_slice(self.params.nb_null_period, self.params.nb_fft)];

        let total_frequency_offset = self.coarse_frequency_offset + self.fine_frequency_offset;
        self.temp_fft_buffer.copy_from_slice(prs_data);
        dsp::apply_pll(&mut self.temp_fft_buffer, total_frequency_offset, 0);

        // Perform impulse correlation in time domain using multiplication in frequency domain
        // NOTE: Our PRS FFT reference was conjugated in self.init()
        self.fft.process(&mut self.temp_fft_buffer);
        for (x, y) in izip!(
            self.correlation_prs_fft_data.iter().take(self.params.nb_fft),
            self.temp_fft_buffer.iter_mut().take(self.params.nb_fft),
        ) {
            *y *= *x;
        }
        self.ifft.process(&mut self.temp_fft_buffer);
        for (x, y) in izip!(
            self.temp_fft_buffer.iter().take(self.params.nb_fft),
            self.fine_time_impulse_response_buffer.iter_mut().take(self.params.nb_fft),
        ) {
            let amplitude = x.norm().log10() * 20.0;
            *y = amplitude;
        }

        let (impulse_peak_index, impulse_peak_value) = self
            .fine_time_impulse_response_buffer
            .iter()
            .enumerate()
            .map(|(i, peak_value)| {
                // We expect that the correlation peak will at least be somewhere near where we expect it
                // When we are still locking on, the impulse response may have many peaks due to frequency offsets
                // This causes spurious desyncs when one of these other peaks are very far away
                // Thus we weigh the value of the peak with its distance from the expected location
                let expected_peak_x = self.params.nb_cyclic_prefix;
                let distance_from_expectation = (expected_peak_x as i32 - i as i32).abs();
                let norm_distance = (distance_from_expectation as f32) / (self.params.nb_symbol_period as f32);
                let decay_weight = 1.0 - self.settings.fine_time_impulse_peak_distance_probability;
                let probability = 1.0 - decay_weight * norm_distance;
                let weighted_peak_value = probability * peak_value;
                (i, weighted_peak_value)
            })
            .max_by(|(_, x), (_, y)| {
                if x > y {
                    Ordering::Greater
                } else {
                    Ordering::Less
                }
            })
            .expect("The fine time impulse buffer cannot be empty");

        let impulse_sum: f32 = self.fine_time_impulse_response_buffer.iter().sum();
        let impulse_average = impulse_sum / (self.params.nb_fft as f32);

        // If the main lobe is insufficiently powerful we do not have a valid impulse response
        // This probably means we had a severe desync and should restart
        let impulse_peak_height = impulse_peak_value - impulse_average;
        if impulse_peak_height < self.settings.fine_time_impulse_peak_threshold_db {
            log::info!(
                target: "ofdm-demod",
                "desync on fine time sync, impulse peak {:.1}dB below threshold",
                self.settings.fine_time_impulse_peak_threshold_db - impulse_peak_height,
            );
            self.reset_from_desync();
            self.total_frames_desync += 1;
            return;
        }

        // | [NULL] | [Cyclic prefix] | [PRS FFT]
        // The PRS correlation lobe occurs just after the cyclic prefix
        // We actually want the index at the start of the cyclic prefix, so we adjust offset for that
        let prs_start_offset = impulse_peak_index as isize - self.params.nb_cyclic_prefix as isize;
        let prs_start_index =
            isize::max(self.params.nb_null_period as isize + prs_start_offset, 0) as usize;
        let prs_length =
            isize::max(self.params.nb_symbol_period as isize - prs_start_offset, 0) as usize;
        let prs_partial_range = span_slice(prs_start_index, prs_length);

        self.frame_fill.reset();
        let frame_fill = &mut self.frame_fill;
        let null_prs_buffer = &self.null_prs_buffer;
        self.pipeline.with_frame_mut(|frame| {
            frame_fill.consume(frame, &null_prs_buffer[prs_partial_range]);
        });

        self.null_prs_buffer.reset();
        self.fine_time_offset = prs_start_offset;
        self.state = OfdmDemodulatorState::ReadingSymbols;
    }

    fn read_symbols(&mut self, buf: &[Complex32]) -> usize {
        let frame_fill = &mut self.frame_fill;
        let total_read = self.pipeline.with_frame_mut(|frame| frame_fill.consume(frame, buf));
        if self.frame_fill.is_full() {
            self.state = OfdmDemodulatorState::ProcessingSymbols;
        }
        total_read
    }

    fn process_symbols(&mut self) {
        // Copy the null symbol so we can use it in find_null_prs
        self.null_prs_buffer.reset();
        let null_range = self.frame_fill.null_symbol_range();
        let null_symbol = self.pipeline.frame_slice(null_range);
        self.null_prs_buffer.consume(null_symbol);

        // Clause 3.13: Frequency offset estimation and correction
        // The workers measure the cyclic prefix phase error of the raw
        // symbols; the NCO closure blends the measurement into the fine
        // frequency offset and publishes the net correction.
        let settings_beta = self.settings.fine_frequency_update_beta;
        let fine_frequency_offset = self.fine_frequency_offset;
        let coarse_frequency_offset = self.coarse_frequency_offset;
        let nb_fft = self.params.nb_fft;

        let mut updated_fine_frequency_offset = fine_frequency_offset;
        let result = self.pipeline.process_frame(|average_phase_error| {
            // Clause 3.13.1 - Fraction frequency offset estimation
            use std::f32::consts::PI;
            let fft_bin_spacing = 1.0 / (nb_fft as f32);
            let measured_correction = -(fft_bin_spacing / 2.0) * average_phase_error / PI;
            let delta = settings_beta * (measured_correction - fine_frequency_offset);
            updated_fine_frequency_offset = wrap_fine_frequency_offset(
                fine_frequency_offset + delta,
                nb_fft,
            );
            updated_fine_frequency_offset + coarse_frequency_offset
        });
        if result.is_none() {
            // Pipeline was stopped mid frame
            return;
        }
        self.fine_frequency_offset = updated_fine_frequency_offset;

        let bits = self.pipeline.output_bits();
        // The callbacks borrow from the pipeline while self is mutably
        // borrowed, so move them out for the call
        let mut callbacks = std::mem::take(&mut self.bits_out_callbacks);
        for callback in &mut callbacks {
            callback(bits);
        }
        self.bits_out_callbacks = callbacks;

        self.total_frames_read += 1;
        self.frame_fill.reset();
        self.state = OfdmDemodulatorState::ReadingNullAndPrs;
    }

    fn update_signal_power_average(&mut self, buf: &[Complex32]) {
        let block_size = self.settings.null_power_total_samples;
        let stride = self.settings.null_power_decimation_factor;

        let (total_blocks, power_sum) = buf
            .chunks_exact(block_size)
            .enumerate()
            .filter(|(index, _)| index % stride == 0)
            .map(|(_, x)| dsp::calculate_l1_average(x))
            .fold((0usize, 0.0), |(total, sum), y| (total + 1, sum + y));

        if total_blocks == 0 {
            return;
        }

        let l1_average = power_sum / (total_blocks as f32);
        let beta = self.settings.null_power_update_beta;
        self.signal_l1_average = beta * l1_average + (1.0 - beta) * self.signal_l1_average;
    }

    fn update_fine_frequency_offset(&mut self, delta: f32) {
        self.fine_frequency_offset =
            wrap_fine_frequency_offset(self.fine_frequency_offset + delta, self.params.nb_fft);
    }
}

fn wrap_fine_frequency_offset(offset: f32, nb_fft: usize) -> f32 {
    // Fine offsets live within half an FFT bin, wrap to prevent precision
    // loss at large accumulated offsets
    let fft_bin_spacing = 1.0 / (nb_fft as f32) * 0.5;
    let fft_bin_margin = 1.01;
    let fft_bin_wrap = fft_bin_spacing * fft_bin_margin;
    offset % fft_bin_wrap
}

fn calculate_dqpsk(params: &OfdmParameters, x0: &[Complex32], x1: &[Complex32], y: &mut [Complex32]) {
    let nb_fft = params.nb_fft;
    let nb_data = params.nb_fft_data_carriers;
    let nb_data_half = nb_data / 2;

    assert!(x0.len() == nb_fft, "x0 ({}) has different length to the fft ({})", x0.len(), nb_fft);
    assert!(x1.len() == nb_fft, "x1 ({}) has different length to the fft ({})", x1.len(), nb_fft);
    assert!(y.len() == nb_data, "y ({}) has different length to the number of data carriers ({})", y.len(), nb_data);
    assert!(nb_fft >= nb_data, "length of fft ({}) is less than number of required data carriers ({})", nb_fft, nb_data);
    assert!(nb_data % 2 == 0, "number of data carriers must be even ({})", nb_data);

    // x0,x1 are FFTs where [0,N] => [0,2Fs)
    // y is the DQPSK for the frequency range [-Fa,0)+(0,Fa] => [2Fs-Fa,2Fs), (0,Fa]

    // [-Fa,0) => [2Fs-Fa,2Fs)
    for i in 0..nb_data_half {
        let dqpsk_index = i;
        let fft_index = nb_fft - nb_data_half + i;
        let phase_delta = x0[fft_index].conj() * x1[fft_index];
        y[dqpsk_index] = phase_delta;
    }
    // (0,Fa] => (0,Fa]
    for i in 0..nb_data_half {
        let dqpsk_index = i + nb_data_half;
        let fft_index = 1 + i;
        let phase_delta = x0[fft_index].conj() * x1[fft_index];
        y[dqpsk_index] = phase_delta;
    }
}

fn calculate_soft_bits(carrier_mapper: &[usize], x: &[Complex32], y: &mut [SoftBit]) {
    assert!(
        carrier_mapper.len() == x.len(),
        "Carrier map and input symbols have mismatching lengths {} != {}",
        carrier_mapper.len(),
        x.len()
    );
    assert!(
        x.len() * 2 == y.len(),
        "Requires 2 soft bits for each input symbol but arrays are of lengths {} and {}",
        x.len(),
        y.len()
    );

    let length = carrier_mapper.len();

    // Clause 3.16 - Data demapper
    for i in 0..length {
        let i_mapped = carrier_mapper[i];
        let mut vec = x[i_mapped];

        // NOTE: Use the L1 norm since it doesn't truncate like L2 norm
        //       I.e. When real=imag, then we expect b0=A, b1=A
        //            But with L2 norm, we get b0=0.707*A, b1=0.707*A
        //                with L1 norm, we get b0=A, b1=A as expected
        let amplitude = vec.re.abs().max(vec.im.abs());
        vec /= amplitude;

        y[i] = quantise_to_soft_bit(vec.re);
        y[i + length] = quantise_to_soft_bit(-vec.im);
    }
}

#[inline(always)]
fn quantise_to_soft_bit(x: f32) -> SoftBit {
    // Clause 3.4.2 - QPSK symbol mapper
    // phi = (1-2*b0) + (1-2*b1)*1j
    // x0 = 1-2*b0, x1 = 1-2*b1
    // b = (1-x)/2
    // The soft decision range is offset binary, so scale (1-x)/2 to it
    let half_range = ((SOFT_BIT_HIGH - SOFT_BIT_LOW) / 2) as f32;
    let y = (1.0 - x) * half_range + (SOFT_BIT_LOW as f32);
    y.clamp(SOFT_BIT_LOW as f32, SOFT_BIT_HIGH as f32) as SoftBit
}

#[inline(always)]
fn span_slice(start: usize, length: usize) -> std::ops::Range<usize> {
    start..start + length
}

#[inline(always)]
fn chunk_slice(index: usize, length: usize) -> std::ops::Range<usize> {
    let start_index = index * length;
    span_slice(start_index, length)
}
