//! Applies decoded FIGs to the ensemble database.

use super::fig_processor::{
    EnsembleDateTime, FigHandler, FigHeaderType0, FigProcessor, FrequencyListEntry, LabelKey,
    LanguageKey, ServiceComponentDescriptor, SubchannelProtection,
};
use crate::database::entities::{AudioServiceType, DataServiceType, ServiceId, TransportMode};
use crate::database::updater::DabDatabaseUpdater;
use dab_core::puncture_codes::get_uep_profile;
use std::collections::BTreeMap;

/// User application type signalling an MOT slideshow component.
pub const USER_APP_TYPE_MOT_SLIDESHOW: u16 = 0x002;

/// Reassembles segmented extended labels. Segment 0 declares the total
/// segment count; a toggle flip discards the partial assembly.
#[derive(Default)]
struct ExtendedLabelAssembler {
    toggle_flag: bool,
    nb_segments: Option<u8>,
    segments: BTreeMap<u8, Vec<u8>>,
}

impl ExtendedLabelAssembler {
    fn update(&mut self, toggle_flag: bool, segment_index: u8, data: &[u8]) -> Option<Vec<u8>> {
        if toggle_flag != self.toggle_flag || self.segments.is_empty() {
            self.toggle_flag = toggle_flag;
            self.nb_segments = None;
            self.segments.clear();
        }
        let mut data = data;
        if segment_index == 0 {
            if data.is_empty() {
                return None;
            }
            let nb_segments = ((data[0] & 0b01110000) >> 4) + 1;
            self.nb_segments = Some(nb_segments);
            data = &data[1..];
        }
        self.segments.insert(segment_index, data.to_vec());

        let nb_segments = self.nb_segments?;
        if self.segments.len() != nb_segments as usize {
            return None;
        }
        let is_contiguous = (0..nb_segments).all(|i| self.segments.contains_key(&i));
        if !is_contiguous {
            return None;
        }
        let mut label = Vec::new();
        for segment in self.segments.values() {
            label.extend_from_slice(segment);
        }
        Some(label)
    }
}

/// Decodes the FIG list of each FIB and routes the contents into the
/// database updater. Also tracks ensemble time and the user application
/// signalling that the database model does not carry.
pub struct FigDatabaseProcessor {
    fig_processor: FigProcessor,
    last_datetime: Option<EnsembleDateTime>,
    user_applications: BTreeMap<(ServiceId, u8), Vec<u16>>,
    extended_labels: BTreeMap<LabelKey, ExtendedLabelAssembler>,
}

impl Default for FigDatabaseProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl FigDatabaseProcessor {
    pub fn new() -> Self {
        Self {
            fig_processor: FigProcessor::new(),
            last_datetime: None,
            user_applications: BTreeMap::new(),
            extended_labels: BTreeMap::new(),
        }
    }

    pub fn process_fib(&mut self, fib: &[u8], updater: &mut DabDatabaseUpdater) {
        let mut handler = DatabaseFigHandler {
            updater,
            last_datetime: &mut self.last_datetime,
            user_applications: &mut self.user_applications,
            extended_labels: &mut self.extended_labels,
        };
        self.fig_processor.process_fib(fib, &mut handler);
    }

    /// Most recent ensemble date and time announcement.
    pub fn last_datetime(&self) -> Option<EnsembleDateTime> {
        self.last_datetime
    }

    /// User application types announced for a service component.
    pub fn user_applications(&self, sid: ServiceId, scids: u8) -> &[u16] {
        self.user_applications
            .get(&(sid, scids))
            .map(|apps| apps.as_slice())
            .unwrap_or(&[])
    }

    pub fn total_figs(&self) -> u32 {
        self.fig_processor.total_figs
    }

    pub fn total_fig_errors(&self) -> u32 {
        self.fig_processor.total_fig_errors
    }
}

struct DatabaseFigHandler<'a> {
    updater: &'a mut DabDatabaseUpdater,
    last_datetime: &'a mut Option<EnsembleDateTime>,
    user_applications: &'a mut BTreeMap<(ServiceId, u8), Vec<u16>>,
    extended_labels: &'a mut BTreeMap<LabelKey, ExtendedLabelAssembler>,
}

impl DatabaseFigHandler<'_> {
    fn apply_label(&mut self, key: LabelKey, label: &[u8]) {
        match key {
            LabelKey::Ensemble(eid) => {
                let mut ensemble = self.updater.ensemble_updater();
                ensemble.set_reference(eid & 0x0FFF);
                ensemble.set_country_id((eid >> 12) as u8);
                ensemble.set_label(label);
            }
            LabelKey::Service(sid) => {
                let mut service = self.updater.service_updater(sid);
                service.set_country_id((sid >> 12) as u8);
                service.set_label(label);
            }
            LabelKey::DataService(sid) => {
                self.updater.service_updater(sid).set_label(label);
            }
            LabelKey::ServiceComponent(sid, scids) => {
                self.updater.service_component_updater(sid, scids).set_label(label);
            }
        }
    }
}

impl FigHandler for DatabaseFigHandler<'_> {
    fn on_ensemble(
        &mut self,
        _header: FigHeaderType0,
        eid: u16,
        _change_flags: u8,
        _is_alarm: bool,
        _cif_hi: u8,
        _cif_lo: u8,
    ) {
        let mut ensemble = self.updater.ensemble_updater();
        ensemble.set_reference(eid & 0x0FFF);
        ensemble.set_country_id((eid >> 12) as u8);
    }

    fn on_subchannel(
        &mut self,
        _header: FigHeaderType0,
        id: u8,
        start_address: u16,
        protection: SubchannelProtection,
    ) {
        let mut subchannel = self.updater.subchannel_updater(id);
        subchannel.set_start_address(start_address);
        match protection {
            SubchannelProtection::Uep { table_index } => {
                subchannel.set_uep_prot_index(table_index);
                if let Some(profile) = get_uep_profile(table_index as usize) {
                    subchannel.set_length(profile.subchannel_size_cu() as u16);
                } else {
                    log::error!(
                        target: "db-updater",
                        "subchannel {} references invalid UEP table index {}", id, table_index,
                    );
                }
            }
            SubchannelProtection::Eep { eep_type, level, size_cu } => {
                subchannel.set_eep_prot_level(level);
                subchannel.set_eep_type(eep_type);
                subchannel.set_length(size_cu);
            }
        }
    }

    fn on_service_component(
        &mut self,
        _header: FigHeaderType0,
        sid: ServiceId,
        component_index: u8,
        descriptor: ServiceComponentDescriptor,
    ) {
        // Make sure the owning service exists
        self.updater.service_updater(sid);
        let mut component = self.updater.service_component_updater(sid, component_index);
        match descriptor {
            ServiceComponentDescriptor::StreamAudio { ascty, subchannel_id, .. } => {
                component.set_audio_service_type(AudioServiceType::from_ascty(ascty));
                component.set_subchannel(subchannel_id);
            }
            ServiceComponentDescriptor::StreamData { dscty, subchannel_id, .. } => {
                component.set_transport_mode(TransportMode::StreamData);
                component.set_data_service_type(DataServiceType::from_dscty(dscty));
                component.set_subchannel(subchannel_id);
            }
            ServiceComponentDescriptor::Fidc { dscty, .. } => {
                component.set_transport_mode(TransportMode::Fidc);
                component.set_data_service_type(DataServiceType::from_dscty(dscty));
            }
            ServiceComponentDescriptor::PacketData { global_id, .. } => {
                component.set_transport_mode(TransportMode::PacketData);
                component.set_global_id(global_id);
            }
        }
    }

    fn on_service_component_packet(
        &mut self,
        _header: FigHeaderType0,
        global_id: u16,
        dscty: u8,
        subchannel_id: u8,
        _packet_address: u16,
    ) {
        let Some(mut component) = self.updater.service_component_updater_by_global_id(global_id) else {
            log::info!(
                target: "db-updater",
                "FIG 0/3 for unknown service component global id {}", global_id,
            );
            return;
        };
        component.set_data_service_type(DataServiceType::from_dscty(dscty));
        component.set_subchannel(subchannel_id);
    }

    fn on_service_language(&mut self, _header: FigHeaderType0, key: LanguageKey, language: u8) {
        let component = match key {
            LanguageKey::Subchannel(id) => self.updater.service_component_updater_by_subchannel(id),
            LanguageKey::Global(global_id) => {
                self.updater.service_component_updater_by_global_id(global_id)
            }
        };
        let Some(component) = component else {
            return;
        };
        let sid = component.service_reference();
        self.updater.service_updater(sid).set_language(language);
    }

    fn on_service_component_global(
        &mut self,
        _header: FigHeaderType0,
        sid: ServiceId,
        scids: u8,
        global_id: u16,
    ) {
        self.updater.service_component_updater(sid, scids).set_global_id(global_id);
    }

    fn on_ensemble_country(
        &mut self,
        _header: FigHeaderType0,
        lto_minutes: i32,
        ecc: u8,
        international_table_id: u8,
    ) {
        let mut ensemble = self.updater.ensemble_updater();
        ensemble.set_local_time_offset(lto_minutes);
        ensemble.set_extended_country_code(ecc);
        ensemble.set_international_table_id(international_table_id);
    }

    fn on_datetime(&mut self, _header: FigHeaderType0, datetime: EnsembleDateTime) {
        *self.last_datetime = Some(datetime);
    }

    fn on_user_application(
        &mut self,
        _header: FigHeaderType0,
        sid: ServiceId,
        scids: u8,
        app_type: u16,
        _data: &[u8],
    ) {
        let apps = self.user_applications.entry((sid, scids)).or_default();
        if !apps.contains(&app_type) {
            apps.push(app_type);
        }
    }

    fn on_subchannel_fec(&mut self, _header: FigHeaderType0, subchannel_id: u8, fec_scheme: u8) {
        self.updater.subchannel_updater(subchannel_id).set_fec_scheme(fec_scheme);
    }

    fn on_programme_type(
        &mut self,
        _header: FigHeaderType0,
        sid: ServiceId,
        programme_type: u8,
        language: Option<u8>,
        closed_caption: Option<u8>,
    ) {
        let mut service = self.updater.service_updater(sid);
        service.set_programme_type(programme_type);
        if let Some(language) = language {
            service.set_language(language);
        }
        if let Some(closed_caption) = closed_caption {
            service.set_closed_caption(closed_caption);
        }
    }

    fn on_frequency_information(
        &mut self,
        _header: FigHeaderType0,
        id_field: u16,
        is_continuous_output: bool,
        entry: FrequencyListEntry,
    ) {
        match entry {
            FrequencyListEntry::DabEnsemble {
                is_geographically_adjacent,
                is_transmission_mode_i,
                frequency_khz,
            } => {
                let mut other = self.updater.other_ensemble_updater(id_field);
                other.set_country_id((id_field >> 12) as u8);
                other.set_is_continuous_output(is_continuous_output);
                other.set_is_geographically_adjacent(is_geographically_adjacent);
                other.set_is_transmission_mode_i(is_transmission_mode_i);
                other.set_frequency(frequency_khz);
            }
            FrequencyListEntry::FmRds { frequency_khz } => {
                self.updater.fm_service_updater(id_field).add_frequency(frequency_khz);
            }
            FrequencyListEntry::Drm { id2, frequency_khz } => {
                let drm_code = (u32::from(id2) << 16) | u32::from(id_field);
                self.updater.drm_service_updater(drm_code).add_frequency(frequency_khz);
            }
            FrequencyListEntry::Amss { id2, frequency_khz } => {
                let amss_code = (u32::from(id2) << 16) | u32::from(id_field);
                self.updater.amss_service_updater(amss_code).add_frequency(frequency_khz);
            }
        }
    }

    fn on_other_ensemble_service(
        &mut self,
        _header: FigHeaderType0,
        _sid: ServiceId,
        ensembles: &[u16],
    ) {
        for &eid in ensembles {
            self.updater.other_ensemble_updater(eid).set_country_id((eid >> 12) as u8);
        }
    }

    fn on_short_label(&mut self, key: LabelKey, _charset: u8, label: &[u8; 16], _flag_field: u16) {
        self.apply_label(key, label);
    }

    fn on_extended_label(&mut self, key: LabelKey, toggle_flag: bool, segment_index: u8, data: &[u8]) {
        let assembler = self.extended_labels.entry(key).or_default();
        if let Some(label) = assembler.update(toggle_flag, segment_index, data) {
            self.apply_label(key, &label);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fic::fic_decoder::test_support::{encode_fib_group, make_fib, make_fib_group};
    use crate::fic::fic_decoder::FicDecoder;

    #[test]
    fn fib_round_trip_registers_ensemble_label() {
        // FIG 1/0: ensemble label "BBC NATIONAL DAB " for EId 0xC181
        let mut payload = vec![(1 << 5) | 21, 0x00, 0xC1, 0x81];
        payload.extend_from_slice(b"BBC NATIONAL DAB");
        payload.extend_from_slice(&[0x00, 0x00]);
        assert_eq!(payload[4..20].len(), 16);

        let fib = make_fib(&payload);
        let group = make_fib_group([fib, fib, fib]);
        let soft_bits = encode_fib_group(&group);

        let mut fic_decoder = FicDecoder::new(3);
        let fibs = fic_decoder.decode_fib_group(&soft_bits, 0);
        assert_eq!(fibs.len(), 3);
        for (decoded, original) in fibs.iter().zip([fib, fib, fib].iter()) {
            assert_eq!(decoded, original, "decoded FIB differs from transmitted FIB");
        }

        let mut updater = DabDatabaseUpdater::new();
        let mut processor = FigDatabaseProcessor::new();
        for fib in &fibs {
            processor.process_fib(fib.as_slice(), &mut updater);
        }
        assert_eq!(updater.database().ensemble.label, "BBC NATIONAL DAB");
        assert_eq!(updater.database().ensemble.reference, 0x181);
        assert_eq!(updater.database().ensemble.country_id, 0xC);
        assert_eq!(processor.total_fig_errors(), 0);
    }

    #[test]
    fn service_organisation_builds_complete_channel_chain() {
        let mut updater = DabDatabaseUpdater::new();
        let mut processor = FigDatabaseProcessor::new();

        // FIG 0/2: service 0xC221 with a DAB+ component on subchannel 3
        let fig_0_2 = [0x06, 0x02, 0xC2, 0x21, 0x01, 63, (3 << 2) | 0b10];
        // FIG 0/1 long form: subchannel 3, start 54, EEP 3-A, size 72
        let descriptor: u32 = (3 << 26) | (54 << 16) | (1 << 15) | (2 << 10) | 72;
        let fig_0_1 = [
            0x05,
            0x01,
            (descriptor >> 24) as u8,
            (descriptor >> 16) as u8,
            (descriptor >> 8) as u8,
            descriptor as u8,
        ];
        let mut payload = vec![];
        payload.extend_from_slice(&fig_0_2);
        payload.extend_from_slice(&fig_0_1);
        let fib = make_fib(&payload);
        processor.process_fib(fib.as_slice(), &mut updater);

        assert!(updater.is_service_component_complete(0xC221, 0));
        assert!(updater.is_subchannel_complete(3));
        let database = updater.database();
        assert_eq!(database.links.subchannel_to_component[&3], (0xC221, 0));
        let subchannel = &database.subchannels[&3];
        assert_eq!(subchannel.start_address, 54);
        assert_eq!(subchannel.length, 72);
        assert_eq!(subchannel.eep_prot_level, 3);
        assert!(!subchannel.is_uep);
    }

    #[test]
    fn uep_short_form_derives_size_from_the_table() {
        let mut updater = DabDatabaseUpdater::new();
        let mut processor = FigDatabaseProcessor::new();
        // FIG 0/1 short form: subchannel 1, start 0, table index 1
        let fib = make_fib(&[0x04, 0x01, 1 << 2, 0, 0]);
        processor.process_fib(fib.as_slice(), &mut updater);

        let subchannel = &updater.database().subchannels[&1];
        assert!(subchannel.is_uep);
        assert_eq!(subchannel.uep_prot_index, 1);
        assert_eq!(subchannel.length, 16);
    }

    #[test]
    fn extended_label_assembles_in_segment_order() {
        let mut updater = DabDatabaseUpdater::new();
        let mut processor = FigDatabaseProcessor::new();

        // FIG 2/1 label for service 0x4001 in two segments
        let seg0_text = b"Radio ";
        let seg1_text = b"Caroline";
        let mut seg1 = vec![(2 << 5) | (2 + 1 + seg1_text.len()) as u8];
        seg1.push(0x80 | (1 << 4) | 1); // toggle 1, segment 1, extension 1
        seg1.extend_from_slice(&[0x40, 0x01]);
        seg1.extend_from_slice(seg1_text);

        let mut seg0 = vec![(2 << 5) | (2 + 1 + 1 + seg0_text.len()) as u8];
        seg0.push(0x80 | 1); // toggle 1, segment 0, extension 1
        seg0.extend_from_slice(&[0x40, 0x01]);
        seg0.push(0b0001_0000); // two segments in total
        seg0.extend_from_slice(seg0_text);

        // Out of order arrival
        let mut payload = seg1.clone();
        payload.extend_from_slice(&seg0);
        let fib = make_fib(&payload);
        processor.process_fib(fib.as_slice(), &mut updater);

        assert_eq!(updater.database().services[&0x4001].label, "Radio Caroline");
    }
}
