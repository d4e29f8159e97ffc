pub mod circular_bucket;
pub mod linear_bucket;
pub mod dsp;
pub mod ofdm_parameters;
pub mod ofdm_frame_buffer;
pub mod pipeline_sync;
pub mod ofdm_demodulator;
