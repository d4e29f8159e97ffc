pub mod basic_thread_pool;
pub mod basic_dab_plus_channel;
#[allow(clippy::module_inception)]
pub mod basic_radio;
