//! Walks the FIG list of a fast information block and dispatches each
//! recognised (type, extension) pair to a handler.

use crate::database::entities::{EepType, ServiceId};

/// Header fields common to all FIG type 0 extensions.
#[derive(Debug, Clone, Copy)]
pub struct FigHeaderType0 {
    /// Current/next configuration flag.
    pub cn: u8,
    /// Other ensemble flag.
    pub oe: u8,
    /// Programme/data flag, selects 16 or 32 bit service identifiers.
    pub pd: u8,
}

/// Addressing of a label carrying FIG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LabelKey {
    Ensemble(u16),
    Service(ServiceId),
    ServiceComponent(ServiceId, u8),
    DataService(ServiceId),
}

/// Service component descriptor carried by FIG 0/2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceComponentDescriptor {
    StreamAudio { ascty: u8, subchannel_id: u8, is_primary: bool, is_ca: bool },
    StreamData { dscty: u8, subchannel_id: u8, is_primary: bool, is_ca: bool },
    Fidc { dscty: u8, fidc_id: u8, is_primary: bool, is_ca: bool },
    PacketData { global_id: u16, is_primary: bool, is_ca: bool },
}

/// Addressing of a FIG 0/5 language assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LanguageKey {
    Subchannel(u8),
    Global(u16),
}

/// Subchannel protection parameters from FIG 0/1.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubchannelProtection {
    /// Short form: index into the UEP protection table, 1..=64.
    Uep { table_index: u8 },
    /// Long form: equal error protection with an explicit size.
    Eep { eep_type: EepType, level: u8, size_cu: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnsembleDateTime {
    pub modified_julian_date: u32,
    pub hours: u8,
    pub minutes: u8,
    pub seconds: u8,
    pub milliseconds: u16,
    pub is_leap_second: bool,
}

/// One entry of a FIG 0/21 frequency list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyListEntry {
    DabEnsemble { is_geographically_adjacent: bool, is_transmission_mode_i: bool, frequency_khz: u32 },
    FmRds { frequency_khz: u32 },
    Drm { id2: u8, frequency_khz: u32 },
    Amss { id2: u8, frequency_khz: u32 },
}

/// Receiver of decoded FIG contents. Unhandled callbacks default to no-ops.
#[allow(unused_variables)]
pub trait FigHandler {
    fn on_ensemble(&mut self, header: FigHeaderType0, eid: u16, change_flags: u8, is_alarm: bool, cif_hi: u8, cif_lo: u8) {}
    fn on_subchannel(&mut self, header: FigHeaderType0, id: u8, start_address: u16, protection: SubchannelProtection) {}
    fn on_service_component(&mut self, header: FigHeaderType0, sid: ServiceId, component_index: u8, descriptor: ServiceComponentDescriptor) {}
    fn on_service_component_packet(&mut self, header: FigHeaderType0, global_id: u16, dscty: u8, subchannel_id: u8, packet_address: u16) {}
    fn on_service_language(&mut self, header: FigHeaderType0, key: LanguageKey, language: u8) {}
    fn on_service_component_global(&mut self, header: FigHeaderType0, sid: ServiceId, scids: u8, global_id: u16) {}
    fn on_ensemble_country(&mut self, header: FigHeaderType0, lto_minutes: i32, ecc: u8, international_table_id: u8) {}
    fn on_datetime(&mut self, header: FigHeaderType0, datetime: EnsembleDateTime) {}
    fn on_user_application(&mut self, header: FigHeaderType0, sid: ServiceId, scids: u8, app_type: u16, data: &[u8]) {}
    fn on_subchannel_fec(&mut self, header: FigHeaderType0, subchannel_id: u8, fec_scheme: u8) {}
    fn on_programme_type(&mut self, header: FigHeaderType0, sid: ServiceId, programme_type: u8, language: Option<u8>, closed_caption: Option<u8>) {}
    fn on_frequency_information(&mut self, header: FigHeaderType0, id_field: u16, is_continuous_output: bool, entry: FrequencyListEntry) {}
    fn on_other_ensemble_service(&mut self, header: FigHeaderType0, sid: ServiceId, ensembles: &[u16]) {}
    fn on_short_label(&mut self, key: LabelKey, charset: u8, label: &[u8; 16], flag_field: u16) {}
    fn on_extended_label(&mut self, key: LabelKey, toggle_flag: bool, segment_index: u8, data: &[u8]) {}
}

/// Dispatches the FIG list of validated FIBs.
#[derive(Default)]
pub struct FigProcessor {
    pub total_figs: u32,
    pub total_fig_errors: u32,
}

impl FigProcessor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Walks one 32 byte FIB (the trailing checksum is ignored) and invokes
    /// the handler for every recognised FIG. Malformed FIGs are logged,
    /// counted and skipped; the rest of the FIB is still processed where the
    /// declared lengths allow it.
    pub fn process_fib(&mut self, buf: &[u8], handler: &mut impl FigHandler) {
        let buf = &buf[..buf.len().min(30)];
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let header = buf[curr_byte];
            // End marker, the remainder of the FIB is padding
            if header == 0xFF || header == 0x00 {
                break;
            }
            let fig_type = (header & 0b11100000) >> 5;
            let fig_length = (header & 0b00011111) as usize;
            curr_byte += 1;

            if curr_byte + fig_length > buf.len() {
                self.fig_error(format_args!(
                    "FIG type {} length {} overflows the FIB at {}",
                    fig_type, fig_length, curr_byte,
                ));
                return;
            }
            let payload = &buf[curr_byte..curr_byte + fig_length];
            curr_byte += fig_length;

            self.total_figs += 1;
            match fig_type {
                0 => self.process_fig_type_0(payload, handler),
                1 => self.process_fig_type_1(payload, handler),
                2 => self.process_fig_type_2(payload, handler),
                _ => {
                    self.fig_error(format_args!("Unsupported FIG type {}", fig_type));
                }
            }
        }
    }

    fn fig_error(&mut self, message: std::fmt::Arguments<'_>) {
        self.total_fig_errors += 1;
        log::warn!(target: "fig-processor", "{}", message);
    }

    fn process_fig_type_0(&mut self, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.is_empty() {
            self.fig_error(format_args!("FIG 0 has no header byte"));
            return;
        }
        let header = FigHeaderType0 {
            cn: (buf[0] & 0b10000000) >> 7,
            oe: (buf[0] & 0b01000000) >> 6,
            pd: (buf[0] & 0b00100000) >> 5,
        };
        let extension = buf[0] & 0b00011111;
        let data = &buf[1..];

        match extension {
            0 => self.process_fig_0_0(header, data, handler),
            1 => self.process_fig_0_1(header, data, handler),
            2 => self.process_fig_0_2(header, data, handler),
            3 => self.process_fig_0_3(header, data, handler),
            5 => self.process_fig_0_5(header, data, handler),
            8 => self.process_fig_0_8(header, data, handler),
            9 => self.process_fig_0_9(header, data, handler),
            10 => self.process_fig_0_10(header, data, handler),
            13 => self.process_fig_0_13(header, data, handler),
            14 => self.process_fig_0_14(header, data, handler),
            17 => self.process_fig_0_17(header, data, handler),
            21 => self.process_fig_0_21(header, data, handler),
            24 => self.process_fig_0_24(header, data, handler),
            _ => {
                log::debug!(target: "fig-processor", "Ignoring FIG 0/{}", extension);
            }
        }
    }

    // Ensemble information
    fn process_fig_0_0(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.len() < 4 {
            self.fig_error(format_args!("FIG 0/0 too short: {}", buf.len()));
            return;
        }
        let eid = read_u16(buf, 0);
        let change_flags = (buf[2] & 0b11000000) >> 6;
        let is_alarm = (buf[2] & 0b00100000) != 0;
        let cif_hi = buf[2] & 0b00011111;
        let cif_lo = buf[3];
        handler.on_ensemble(header, eid, change_flags, is_alarm, cif_hi, cif_lo);
    }

    // Basic subchannel organisation
    fn process_fig_0_1(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < 3 {
                self.fig_error(format_args!("FIG 0/1 truncated subchannel descriptor"));
                return;
            }
            let subchannel_id = (buf[curr_byte] & 0b11111100) >> 2;
            let start_address = (u16::from(buf[curr_byte] & 0b11) << 8) | u16::from(buf[curr_byte + 1]);
            let is_long_form = (buf[curr_byte + 2] & 0b10000000) != 0;

            let protection = if is_long_form {
                if buf.len() - curr_byte < 4 {
                    self.fig_error(format_args!("FIG 0/1 truncated long form descriptor"));
                    return;
                }
                let option = (buf[curr_byte + 2] & 0b01110000) >> 4;
                let level = ((buf[curr_byte + 2] & 0b00001100) >> 2) + 1;
                let size_cu = (u16::from(buf[curr_byte + 2] & 0b11) << 8) | u16::from(buf[curr_byte + 3]);
                curr_byte += 4;
                let eep_type = match option {
                    0 => EepType::A,
                    1 => EepType::B,
                    option => {
                        self.fig_error(format_args!("FIG 0/1 unknown protection option {}", option));
                        continue;
                    }
                };
                SubchannelProtection::Eep { eep_type, level, size_cu }
            } else {
                // Table switch must be zero for the standard UEP table
                let table_switch = (buf[curr_byte + 2] & 0b01000000) >> 6;
                let table_index = buf[curr_byte + 2] & 0b00111111;
                curr_byte += 3;
                if table_switch != 0 {
                    self.fig_error(format_args!("FIG 0/1 unsupported table switch"));
                    continue;
                }
                SubchannelProtection::Uep { table_index: table_index + 1 }
            };
            handler.on_subchannel(header, subchannel_id, start_address, protection);
        }
    }

    // Basic service and service component definition
    fn process_fig_0_2(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let nb_sid_bytes = if header.pd == 1 { 4 } else { 2 };
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < nb_sid_bytes + 1 {
                self.fig_error(format_args!("FIG 0/2 truncated service block"));
                return;
            }
            let sid = read_service_id(buf, curr_byte, header.pd);
            curr_byte += nb_sid_bytes;
            let nb_components = (buf[curr_byte] & 0b00001111) as usize;
            curr_byte += 1;

            if buf.len() - curr_byte < nb_components * 2 {
                self.fig_error(format_args!("FIG 0/2 truncated component list"));
                return;
            }
            for component_index in 0..nb_components {
                let b0 = buf[curr_byte];
                let b1 = buf[curr_byte + 1];
                curr_byte += 2;
                let tmid = (b0 & 0b11000000) >> 6;
                let is_primary = (b1 & 0b00000010) != 0;
                let is_ca = (b1 & 0b00000001) != 0;
                let descriptor = match tmid {
                    0b00 => ServiceComponentDescriptor::StreamAudio {
                        ascty: b0 & 0b00111111,
                        subchannel_id: (b1 & 0b11111100) >> 2,
                        is_primary,
                        is_ca,
                    },
                    0b01 => ServiceComponentDescriptor::StreamData {
                        dscty: b0 & 0b00111111,
                        subchannel_id: (b1 & 0b11111100) >> 2,
                        is_primary,
                        is_ca,
                    },
                    0b10 => ServiceComponentDescriptor::Fidc {
                        dscty: b0 & 0b00111111,
                        fidc_id: (b1 & 0b11111100) >> 2,
                        is_primary,
                        is_ca,
                    },
                    _ => ServiceComponentDescriptor::PacketData {
                        global_id: (u16::from(b0 & 0b00111111) << 6) | u16::from((b1 & 0b11111100) >> 2),
                        is_primary,
                        is_ca,
                    },
                };
                handler.on_service_component(header, sid, component_index as u8, descriptor);
            }
        }
    }

    // Service component in packet mode
    fn process_fig_0_3(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < 5 {
                self.fig_error(format_args!("FIG 0/3 truncated descriptor"));
                return;
            }
            let global_id = (u16::from(buf[curr_byte]) << 4) | u16::from((buf[curr_byte + 1] & 0b11110000) >> 4);
            let has_ca_org = (buf[curr_byte + 1] & 0b00000001) != 0;
            let dscty = buf[curr_byte + 2] & 0b00111111;
            let subchannel_id = (buf[curr_byte + 3] & 0b11111100) >> 2;
            let packet_address =
                (u16::from(buf[curr_byte + 3] & 0b11) << 8) | u16::from(buf[curr_byte + 4]);
            curr_byte += 5;
            if has_ca_org {
                if buf.len() - curr_byte < 2 {
                    self.fig_error(format_args!("FIG 0/3 truncated CA organisation"));
                    return;
                }
                curr_byte += 2;
            }
            handler.on_service_component_packet(header, global_id, dscty, subchannel_id, packet_address);
        }
    }

    // Service language
    fn process_fig_0_5(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            let is_long_form = (buf[curr_byte] & 0b10000000) != 0;
            if is_long_form {
                if buf.len() - curr_byte < 3 {
                    self.fig_error(format_args!("FIG 0/5 truncated long form"));
                    return;
                }
                let global_id = (u16::from(buf[curr_byte] & 0b00001111) << 8) | u16::from(buf[curr_byte + 1]);
                let language = buf[curr_byte + 2];
                curr_byte += 3;
                handler.on_service_language(header, LanguageKey::Global(global_id), language);
            } else {
                if buf.len() - curr_byte < 2 {
                    self.fig_error(format_args!("FIG 0/5 truncated short form"));
                    return;
                }
                let subchannel_id = buf[curr_byte] & 0b00111111;
                let language = buf[curr_byte + 1];
                curr_byte += 2;
                handler.on_service_language(header, LanguageKey::Subchannel(subchannel_id), language);
            }
        }
    }

    // Service component global definition
    fn process_fig_0_8(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let nb_sid_bytes = if header.pd == 1 { 4 } else { 2 };
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < nb_sid_bytes + 2 {
                self.fig_error(format_args!("FIG 0/8 truncated descriptor"));
                return;
            }
            let sid = read_service_id(buf, curr_byte, header.pd);
            curr_byte += nb_sid_bytes;
            let has_extension = (buf[curr_byte] & 0b10000000) != 0;
            let scids = buf[curr_byte] & 0b00001111;
            curr_byte += 1;

            let is_long_form = (buf[curr_byte] & 0b10000000) != 0;
            if is_long_form {
                if buf.len() - curr_byte < 2 {
                    self.fig_error(format_args!("FIG 0/8 truncated SCId"));
                    return;
                }
                let global_id = (u16::from(buf[curr_byte] & 0b00001111) << 8) | u16::from(buf[curr_byte + 1]);
                curr_byte += 2;
                handler.on_service_component_global(header, sid, scids, global_id);
            } else {
                // Short form references the subchannel directly; the global
                // binding is already known through FIG 0/2
                curr_byte += 1;
            }
            if has_extension {
                curr_byte += 1;
            }
        }
    }

    // Country, LTO and international table
    fn process_fig_0_9(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.len() < 3 {
            self.fig_error(format_args!("FIG 0/9 too short: {}", buf.len()));
            return;
        }
        let lto_sign_is_negative = (buf[0] & 0b00100000) != 0;
        let lto_half_hours = i32::from(buf[0] & 0b00011111);
        let lto_minutes = if lto_sign_is_negative { -30 * lto_half_hours } else { 30 * lto_half_hours };
        let ecc = buf[1];
        let international_table_id = buf[2];
        handler.on_ensemble_country(header, lto_minutes, ecc, international_table_id);
    }

    // Date and time
    fn process_fig_0_10(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.len() < 4 {
            self.fig_error(format_args!("FIG 0/10 too short: {}", buf.len()));
            return;
        }
        let mjd = (u32::from(buf[0] & 0b01111111) << 10)
            | (u32::from(buf[1]) << 2)
            | u32::from((buf[2] & 0b11000000) >> 6);
        let is_leap_second = (buf[2] & 0b00100000) != 0;
        let is_long_form = (buf[2] & 0b00001000) != 0;
        let hours = ((buf[2] & 0b00000111) << 2) | ((buf[3] & 0b11000000) >> 6);
        let minutes = buf[3] & 0b00111111;

        let (seconds, milliseconds) = if is_long_form {
            if buf.len() < 6 {
                self.fig_error(format_args!("FIG 0/10 truncated long form"));
                return;
            }
            let seconds = (buf[4] & 0b11111100) >> 2;
            let milliseconds = (u16::from(buf[4] & 0b11) << 8) | u16::from(buf[5]);
            (seconds, milliseconds)
        } else {
            (0, 0)
        };

        handler.on_datetime(
            header,
            EnsembleDateTime {
                modified_julian_date: mjd,
                hours,
                minutes,
                seconds,
                milliseconds,
                is_leap_second,
            },
        );
    }

    // User application information
    fn process_fig_0_13(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let nb_sid_bytes = if header.pd == 1 { 4 } else { 2 };
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < nb_sid_bytes + 1 {
                self.fig_error(format_args!("FIG 0/13 truncated descriptor"));
                return;
            }
            let sid = read_service_id(buf, curr_byte, header.pd);
            curr_byte += nb_sid_bytes;
            let scids = (buf[curr_byte] & 0b11110000) >> 4;
            let nb_user_apps = (buf[curr_byte] & 0b00001111) as usize;
            curr_byte += 1;

            for _ in 0..nb_user_apps {
                if buf.len() - curr_byte < 2 {
                    self.fig_error(format_args!("FIG 0/13 truncated user application"));
                    return;
                }
                let app_type = (u16::from(buf[curr_byte]) << 3) | u16::from((buf[curr_byte + 1] & 0b11100000) >> 5);
                let nb_data_bytes = (buf[curr_byte + 1] & 0b00011111) as usize;
                curr_byte += 2;
                if buf.len() - curr_byte < nb_data_bytes {
                    self.fig_error(format_args!("FIG 0/13 truncated user application data"));
                    return;
                }
                let data = &buf[curr_byte..curr_byte + nb_data_bytes];
                curr_byte += nb_data_bytes;
                handler.on_user_application(header, sid, scids, app_type, data);
            }
        }
    }

    // FEC subchannel organisation for packet mode
    fn process_fig_0_14(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        for &byte in buf {
            let subchannel_id = (byte & 0b11111100) >> 2;
            let fec_scheme = byte & 0b00000011;
            handler.on_subchannel_fec(header, subchannel_id, fec_scheme);
        }
    }

    // Programme type
    fn process_fig_0_17(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < 4 {
                self.fig_error(format_args!("FIG 0/17 truncated descriptor"));
                return;
            }
            let sid = ServiceId::from(read_u16(buf, curr_byte));
            let has_language = (buf[curr_byte + 2] & 0b00100000) != 0;
            let has_closed_caption = (buf[curr_byte + 2] & 0b00010000) != 0;
            curr_byte += 3;

            let nb_optional = usize::from(has_language) + usize::from(has_closed_caption);
            if buf.len() - curr_byte < nb_optional + 1 {
                self.fig_error(format_args!("FIG 0/17 truncated optional fields"));
                return;
            }
            let language = if has_language {
                let value = buf[curr_byte];
                curr_byte += 1;
                Some(value)
            } else {
                None
            };
            let closed_caption = if has_closed_caption {
                let value = buf[curr_byte];
                curr_byte += 1;
                Some(value)
            } else {
                None
            };
            let programme_type = buf[curr_byte] & 0b00011111;
            curr_byte += 1;
            handler.on_programme_type(header, sid, programme_type, language, closed_caption);
        }
    }

    // Frequency information
    fn process_fig_0_21(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.len() < 2 {
            self.fig_error(format_args!("FIG 0/21 too short: {}", buf.len()));
            return;
        }
        // Skip the rfa field, keep the FI list length
        let nb_fi_list_bytes = (buf[1] & 0b00011111) as usize;
        let mut curr_byte = 2;
        let fi_list_end = (curr_byte + nb_fi_list_bytes).min(buf.len());

        while curr_byte < fi_list_end {
            if fi_list_end - curr_byte < 3 {
                self.fig_error(format_args!("FIG 0/21 truncated FI block"));
                return;
            }
            let id_field = read_u16(buf, curr_byte);
            let range_modulation = (buf[curr_byte + 2] & 0b11110000) >> 4;
            let is_continuous_output = (buf[curr_byte + 2] & 0b00001000) != 0;
            let nb_freq_list_bytes = (buf[curr_byte + 2] & 0b00000111) as usize;
            curr_byte += 3;

            if fi_list_end - curr_byte < nb_freq_list_bytes {
                self.fig_error(format_args!("FIG 0/21 truncated frequency list"));
                return;
            }
            let freq_list = &buf[curr_byte..curr_byte + nb_freq_list_bytes];
            curr_byte += nb_freq_list_bytes;

            match range_modulation {
                // Other DAB ensembles, 3 bytes per entry
                0b0000 => {
                    for entry in freq_list.chunks_exact(3) {
                        let control = (entry[0] & 0b11111000) >> 3;
                        let frequency =
                            (u32::from(entry[0] & 0b111) << 16) | (u32::from(entry[1]) << 8) | u32::from(entry[2]);
                        handler.on_frequency_information(
                            header,
                            id_field,
                            is_continuous_output,
                            FrequencyListEntry::DabEnsemble {
                                is_geographically_adjacent: control & 0b10000 != 0,
                                is_transmission_mode_i: control & 0b01000 != 0,
                                frequency_khz: frequency * 16,
                            },
                        );
                    }
                }
                // FM with RDS, 1 byte per entry
                0b1000 => {
                    for &entry in freq_list {
                        handler.on_frequency_information(
                            header,
                            id_field,
                            is_continuous_output,
                            FrequencyListEntry::FmRds { frequency_khz: 87_500 + u32::from(entry) * 100 },
                        );
                    }
                }
                // DRM and AMSS, 3 bytes per entry with an id extension
                0b0110 | 0b1110 => {
                    for entry in freq_list.chunks_exact(3) {
                        let id2 = entry[0];
                        let frequency_khz = u32::from(read_u16(entry, 1) & 0x7FFF);
                        let value = if range_modulation == 0b0110 {
                            FrequencyListEntry::Drm { id2, frequency_khz }
                        } else {
                            FrequencyListEntry::Amss { id2, frequency_khz }
                        };
                        handler.on_frequency_information(header, id_field, is_continuous_output, value);
                    }
                }
                _ => {
                    log::debug!(
                        target: "fig-processor",
                        "Ignoring FIG 0/21 range and modulation {}", range_modulation,
                    );
                }
            }
        }
    }

    // OE services
    fn process_fig_0_24(&mut self, header: FigHeaderType0, buf: &[u8], handler: &mut impl FigHandler) {
        let nb_sid_bytes = if header.pd == 1 { 4 } else { 2 };
        let mut curr_byte = 0;
        while curr_byte < buf.len() {
            if buf.len() - curr_byte < nb_sid_bytes + 1 {
                self.fig_error(format_args!("FIG 0/24 truncated descriptor"));
                return;
            }
            let sid = read_service_id(buf, curr_byte, header.pd);
            curr_byte += nb_sid_bytes;
            let nb_eids = (buf[curr_byte] & 0b00001111) as usize;
            curr_byte += 1;

            if buf.len() - curr_byte < nb_eids * 2 {
                self.fig_error(format_args!("FIG 0/24 truncated EId list"));
                return;
            }
            let mut ensembles = Vec::with_capacity(nb_eids);
            for _ in 0..nb_eids {
                ensembles.push(read_u16(buf, curr_byte));
                curr_byte += 2;
            }
            handler.on_other_ensemble_service(header, sid, &ensembles);
        }
    }

    // Short labels
    fn process_fig_type_1(&mut self, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.is_empty() {
            self.fig_error(format_args!("FIG 1 has no header byte"));
            return;
        }
        let charset = (buf[0] & 0b11110000) >> 4;
        let extension = buf[0] & 0b00000111;
        let data = &buf[1..];

        let (key, nb_id_bytes) = match extension {
            // Ensemble label
            0 => {
                if data.len() < 2 {
                    self.fig_error(format_args!("FIG 1/0 too short"));
                    return;
                }
                (LabelKey::Ensemble(read_u16(data, 0)), 2)
            }
            // Programme service label
            1 => {
                if data.len() < 2 {
                    self.fig_error(format_args!("FIG 1/1 too short"));
                    return;
                }
                (LabelKey::Service(ServiceId::from(read_u16(data, 0))), 2)
            }
            // Service component label
            4 => {
                if data.len() < 1 {
                    self.fig_error(format_args!("FIG 1/4 too short"));
                    return;
                }
                let pd = (data[0] & 0b10000000) >> 7;
                let scids = data[0] & 0b00001111;
                let nb_sid_bytes = if pd == 1 { 4 } else { 2 };
                if data.len() < 1 + nb_sid_bytes {
                    self.fig_error(format_args!("FIG 1/4 truncated service id"));
                    return;
                }
                let sid = read_service_id(data, 1, pd);
                (LabelKey::ServiceComponent(sid, scids), 1 + nb_sid_bytes)
            }
            // Data service label
            5 => {
                if data.len() < 4 {
                    self.fig_error(format_args!("FIG 1/5 too short"));
                    return;
                }
                (LabelKey::DataService(read_u32(data, 0)), 4)
            }
            _ => {
                log::debug!(target: "fig-processor", "Ignoring FIG 1/{}", extension);
                return;
            }
        };

        if data.len() < nb_id_bytes + 16 + 2 {
            self.fig_error(format_args!("FIG 1 label field too short"));
            return;
        }
        let mut label = [0u8; 16];
        label.copy_from_slice(&data[nb_id_bytes..nb_id_bytes + 16]);
        let flag_field = read_u16(data, nb_id_bytes + 16);
        handler.on_short_label(key, charset, &label, flag_field);
    }

    // Extended labels
    fn process_fig_type_2(&mut self, buf: &[u8], handler: &mut impl FigHandler) {
        if buf.is_empty() {
            self.fig_error(format_args!("FIG 2 has no header byte"));
            return;
        }
        let toggle_flag = (buf[0] & 0b10000000) != 0;
        let segment_index = (buf[0] & 0b01110000) >> 4;
        let extension = buf[0] & 0b00000111;
        let data = &buf[1..];

        let (key, nb_id_bytes) = match extension {
            0 => {
                if data.len() < 2 {
                    self.fig_error(format_args!("FIG 2/0 too short"));
                    return;
                }
                (LabelKey::Ensemble(read_u16(data, 0)), 2)
            }
            1 => {
                if data.len() < 2 {
                    self.fig_error(format_args!("FIG 2/1 too short"));
                    return;
                }
                (LabelKey::Service(ServiceId::from(read_u16(data, 0))), 2)
            }
            4 => {
                if data.len() < 1 {
                    self.fig_error(format_args!("FIG 2/4 too short"));
                    return;
                }
                let pd = (data[0] & 0b10000000) >> 7;
                let scids = data[0] & 0b00001111;
                let nb_sid_bytes = if pd == 1 { 4 } else { 2 };
                if data.len() < 1 + nb_sid_bytes {
                    self.fig_error(format_args!("FIG 2/4 truncated service id"));
                    return;
                }
                let sid = read_service_id(data, 1, pd);
                (LabelKey::ServiceComponent(sid, scids), 1 + nb_sid_bytes)
            }
            5 => {
                if data.len() < 4 {
                    self.fig_error(format_args!("FIG 2/5 too short"));
                    return;
                }
                (LabelKey::DataService(read_u32(data, 0)), 4)
            }
            _ => {
                log::debug!(target: "fig-processor", "Ignoring FIG 2/{}", extension);
                return;
            }
        };

        handler.on_extended_label(key, toggle_flag, segment_index, &data[nb_id_bytes..]);
    }
}

fn read_u16(buf: &[u8], offset: usize) -> u16 {
    (u16::from(buf[offset]) << 8) | u16::from(buf[offset + 1])
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    (u32::from(read_u16(buf, offset)) << 16) | u32::from(read_u16(buf, offset + 2))
}

fn read_service_id(buf: &[u8], offset: usize, pd: u8) -> ServiceId {
    if pd == 1 {
        read_u32(buf, offset)
    } else {
        ServiceId::from(read_u16(buf, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingHandler {
        ensembles: Vec<u16>,
        subchannels: Vec<(u8, u16, SubchannelProtection)>,
        components: Vec<(ServiceId, u8, ServiceComponentDescriptor)>,
        labels: Vec<(LabelKey, String)>,
        datetimes: Vec<EnsembleDateTime>,
    }

    impl FigHandler for RecordingHandler {
        fn on_ensemble(&mut self, _h: FigHeaderType0, eid: u16, _c: u8, _a: bool, _hi: u8, _lo: u8) {
            self.ensembles.push(eid);
        }
        fn on_subchannel(&mut self, _h: FigHeaderType0, id: u8, start: u16, protection: SubchannelProtection) {
            self.subchannels.push((id, start, protection));
        }
        fn on_service_component(&mut self, _h: FigHeaderType0, sid: ServiceId, index: u8, descriptor: ServiceComponentDescriptor) {
            self.components.push((sid, index, descriptor));
        }
        fn on_datetime(&mut self, _h: FigHeaderType0, datetime: EnsembleDateTime) {
            self.datetimes.push(datetime);
        }
        fn on_short_label(&mut self, key: LabelKey, _charset: u8, label: &[u8; 16], _flags: u16) {
            self.labels.push((key, String::from_utf8_lossy(label).into_owned()));
        }
    }

    fn process(buf: &[u8]) -> (FigProcessor, RecordingHandler) {
        let mut processor = FigProcessor::new();
        let mut handler = RecordingHandler::default();
        processor.process_fib(buf, &mut handler);
        (processor, handler)
    }

    #[test]
    fn parses_ensemble_information() {
        // FIG 0/0: EId 0xC181, no change, CIF counter 12/34
        let fib = [0x05, 0x00, 0xC1, 0x81, 12, 34, 0xFF];
        let (processor, handler) = process(&fib);
        assert_eq!(handler.ensembles, vec![0xC181]);
        assert_eq!(processor.total_fig_errors, 0);
    }

    #[test]
    fn parses_long_form_subchannel() {
        // FIG 0/1 long form: subchannel 3, start 54, EEP 3-A, size 72
        let descriptor: u32 = (3 << 26) | (54 << 16) | (1 << 15) | (0 << 12) | (2 << 10) | 72;
        let fib = [
            0x05,
            0x01,
            (descriptor >> 24) as u8,
            (descriptor >> 16) as u8,
            (descriptor >> 8) as u8,
            descriptor as u8,
            0xFF,
        ];
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 0);
        assert_eq!(
            handler.subchannels,
            vec![(3, 54, SubchannelProtection::Eep { eep_type: EepType::A, level: 3, size_cu: 72 })]
        );
    }

    #[test]
    fn parses_short_form_subchannel() {
        // FIG 0/1 short form: subchannel 1, start 0, UEP table index 5 (0 based 4)
        let fib = [0x04, 0x01, 1 << 2, 0, 4, 0xFF];
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 0);
        assert_eq!(handler.subchannels, vec![(1, 0, SubchannelProtection::Uep { table_index: 5 })]);
    }

    #[test]
    fn parses_audio_stream_component() {
        // FIG 0/2: service 0xC221 with one DAB+ audio component on subchannel 3
        let fib = [
            0x06, 0x02, 0xC2, 0x21, 0x01,
            63, // TMid 0, ASCTy 63
            (3 << 2) | 0b10,
            0xFF,
        ];
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 0);
        assert_eq!(
            handler.components,
            vec![(
                0xC221,
                0,
                ServiceComponentDescriptor::StreamAudio {
                    ascty: 63,
                    subchannel_id: 3,
                    is_primary: true,
                    is_ca: false,
                }
            )]
        );
    }

    #[test]
    fn parses_ensemble_label() {
        let mut fib = vec![
            (1 << 5) | 21, // FIG type 1, length 21
            0x00,          // charset 0, extension 0
            0xC1, 0x81,
        ];
        fib.extend_from_slice(b"BBC NATIONAL DAB");
        fib.extend_from_slice(&[0xFF, 0x00]);
        fib.push(0xFF);
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 0);
        assert_eq!(handler.labels, vec![(LabelKey::Ensemble(0xC181), "BBC NATIONAL DAB".to_string())]);
    }

    #[test]
    fn parses_date_and_time() {
        // FIG 0/10 short form: MJD 59000, 13:37
        let mjd: u32 = 59000;
        let fib = [
            0x05,
            0x0A,
            ((mjd >> 10) & 0x7F) as u8,
            ((mjd >> 2) & 0xFF) as u8,
            (((mjd & 0b11) as u8) << 6) | ((13 >> 2) & 0b111),
            ((13 & 0b11) << 6) | 37,
            0xFF,
        ];
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 0);
        assert_eq!(handler.datetimes.len(), 1);
        let datetime = handler.datetimes[0];
        assert_eq!(datetime.modified_julian_date, 59000);
        assert_eq!(datetime.hours, 13);
        assert_eq!(datetime.minutes, 37);
    }

    #[test]
    fn overlong_fig_is_rejected() {
        // Declared length runs past the end of the FIB
        let fib = [0x1F, 0x00, 0x12];
        let (processor, handler) = process(&fib);
        assert_eq!(processor.total_fig_errors, 1);
        assert!(handler.ensembles.is_empty());
    }
}
