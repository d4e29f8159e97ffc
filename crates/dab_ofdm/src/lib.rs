pub mod dab_ofdm_parameters;
pub mod dab_ofdm_carrier_map;
pub mod dab_ofdm_phase_reference_symbol;
