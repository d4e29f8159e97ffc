pub mod time_deinterleaver;
pub mod msc_subchannel_decoder;
pub mod msc_data_group;
pub mod aac_frame_processor;
pub mod aac_data_decoder;
