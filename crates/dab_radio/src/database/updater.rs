//! Incremental, conflict checked construction of the ensemble database.
//!
//! Every entity carries a dirty bitmask of the fields that have been set.
//! Setting a field that already holds a *different* value records a conflict
//! and keeps the first value. An entity becomes complete once its required
//! mask is reached, which the statistics track for the rest of the receiver.

use super::entities::*;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    Success,
    NoChange,
    Conflict,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseUpdaterStatistics {
    pub nb_total: usize,
    pub nb_pending: usize,
    pub nb_completed: usize,
    pub nb_updates: usize,
    pub nb_conflicts: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct EntityState {
    dirty_field: u8,
    is_complete: bool,
}

// Ensemble form
const ENSEMBLE_FLAG_REFERENCE: u8 = 0b10000000;
const ENSEMBLE_FLAG_COUNTRY_ID: u8 = 0b01000000;
const ENSEMBLE_FLAG_ECC: u8 = 0b00100000;
const ENSEMBLE_FLAG_LABEL: u8 = 0b00010000;
const ENSEMBLE_FLAG_NB_SERVICES: u8 = 0b00001000;
const ENSEMBLE_FLAG_RCOUNT: u8 = 0b00000100;
const ENSEMBLE_FLAG_LTO: u8 = 0b00000010;
const ENSEMBLE_FLAG_INTER_TABLE: u8 = 0b00000001;
const ENSEMBLE_FLAG_REQUIRED: u8 = 0b11100001;

// Service form
const SERVICE_FLAG_COUNTRY_ID: u8 = 0b10000000;
const SERVICE_FLAG_ECC: u8 = 0b01000000;
const SERVICE_FLAG_LABEL: u8 = 0b00100000;
const SERVICE_FLAG_PROGRAMME_TYPE: u8 = 0b00010000;
const SERVICE_FLAG_LANGUAGE: u8 = 0b00001000;
const SERVICE_FLAG_CLOSED_CAPTION: u8 = 0b00000100;
const SERVICE_FLAG_REQUIRED: u8 = 0b10000000;

// Service component form
const SERVICE_COMPONENT_FLAG_LABEL: u8 = 0b10000000;
const SERVICE_COMPONENT_FLAG_TRANSPORT_MODE: u8 = 0b01000000;
const SERVICE_COMPONENT_FLAG_AUDIO_TYPE: u8 = 0b00100000;
const SERVICE_COMPONENT_FLAG_DATA_TYPE: u8 = 0b00010000;
const SERVICE_COMPONENT_FLAG_SUBCHANNEL: u8 = 0b00001000;
const SERVICE_COMPONENT_FLAG_GLOBAL_ID: u8 = 0b00000100;
// two different sets of fields required between audio and data
const SERVICE_COMPONENT_FLAG_REQUIRED_AUDIO: u8 = 0b01101000;
const SERVICE_COMPONENT_FLAG_REQUIRED_DATA: u8 = 0b01011000;

// Subchannel form
const SUBCHANNEL_FLAG_START_ADDRESS: u8 = 0b10000000;
const SUBCHANNEL_FLAG_LENGTH: u8 = 0b01000000;
const SUBCHANNEL_FLAG_IS_UEP: u8 = 0b00100000;
const SUBCHANNEL_FLAG_UEP_PROT_INDEX: u8 = 0b00010000;
const SUBCHANNEL_FLAG_EEP_PROT_LEVEL: u8 = 0b00001000;
const SUBCHANNEL_FLAG_EEP_TYPE: u8 = 0b00000100;
const SUBCHANNEL_FLAG_FEC_SCHEME: u8 = 0b00000010;
const SUBCHANNEL_FLAG_REQUIRED_UEP: u8 = 0b11110000;
const SUBCHANNEL_FLAG_REQUIRED_EEP: u8 = 0b11101100;

// Link service form
const LINK_FLAG_ACTIVE: u8 = 0b10000000;
const LINK_FLAG_HARD: u8 = 0b01000000;
const LINK_FLAG_INTERNATIONAL: u8 = 0b00100000;
const LINK_FLAG_SERVICE_REF: u8 = 0b00010000;
const LINK_FLAG_REQUIRED: u8 = 0b00010000;

// FM/DRM service forms
const FM_FLAG_LSN: u8 = 0b10000000;
const FM_FLAG_TIME_COMP: u8 = 0b01000000;
const FM_FLAG_FREQ: u8 = 0b00100000;
const FM_FLAG_REQUIRED: u8 = 0b10100000;

// AMSS service form
const AMSS_FLAG_TIME_COMP: u8 = 0b10000000;
const AMSS_FLAG_FREQ: u8 = 0b01000000;
const AMSS_FLAG_REQUIRED: u8 = 0b01000000;

// Other ensemble form
const OE_FLAG_COUNTRY_ID: u8 = 0b10000000;
const OE_FLAG_CONT_OUT: u8 = 0b01000000;
const OE_FLAG_GEO_ADJ: u8 = 0b00100000;
const OE_FLAG_MODE_I: u8 = 0b00010000;
const OE_FLAG_FREQ: u8 = 0b00001000;
const OE_FLAG_REQUIRED: u8 = 0b00001000;

/// Mutable view over one entity, its dirty state and the shared statistics.
pub struct EntityUpdater<'a, T> {
    data: &'a mut T,
    state: &'a mut EntityState,
    stats: &'a mut DatabaseUpdaterStatistics,
    links: &'a mut DatabaseLinks,
}

/// Sets one field with the conflict semantics of the database:
/// already set to an equal value is a no-op, already set to a different
/// value records a conflict and keeps the first value.
macro_rules! form_field {
    ($self:ident, $prop:ident, $flag:expr, $value:expr) => {{
        let value = $value;
        if $self.state.dirty_field & $flag != 0 {
            if $self.data.$prop != value {
                log::error!(
                    target: "db-updater",
                    "{} {} conflict because of value mismatch",
                    Self::ENTITY_NAME,
                    stringify!($prop),
                );
                $self.stats.nb_conflicts += 1;
                return UpdateResult::Conflict;
            }
            return UpdateResult::NoChange;
        }
        $self.state.dirty_field |= $flag;
        $self.data.$prop = value;
        $self.stats.nb_updates += 1;
        $self.check_is_complete();
        UpdateResult::Success
    }};
}

impl<'a, T> EntityUpdater<'a, T> {
    fn mark_complete_if(&mut self, is_complete: bool) {
        if self.state.is_complete || !is_complete {
            return;
        }
        self.state.is_complete = true;
        self.stats.nb_completed += 1;
        self.stats.nb_pending -= 1;
        log::info!(
            target: "db-updater",
            "pending={} complete={} updates={} total={} conflicts={}",
            self.stats.nb_pending,
            self.stats.nb_completed,
            self.stats.nb_updates,
            self.stats.nb_total,
            self.stats.nb_conflicts,
        );
    }

    fn conflict(&mut self, reason: &str) -> UpdateResult {
        log::error!(target: "db-updater", "{}", reason);
        self.stats.nb_conflicts += 1;
        UpdateResult::Conflict
    }
}

pub type EnsembleUpdater<'a> = EntityUpdater<'a, Ensemble>;

impl EnsembleUpdater<'_> {
    const ENTITY_NAME: &'static str = "ensemble";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & ENSEMBLE_FLAG_REQUIRED == ENSEMBLE_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_reference(&mut self, reference: EnsembleId) -> UpdateResult {
        form_field!(self, reference, ENSEMBLE_FLAG_REFERENCE, reference)
    }

    pub fn set_country_id(&mut self, country_id: CountryId) -> UpdateResult {
        form_field!(self, country_id, ENSEMBLE_FLAG_COUNTRY_ID, country_id)
    }

    pub fn set_extended_country_code(&mut self, ecc: ExtendedCountryCode) -> UpdateResult {
        // 0x00 is a NULL extended country code used by FIGs that omit it
        if ecc == 0x00 {
            return UpdateResult::NoChange;
        }
        form_field!(self, extended_country_code, ENSEMBLE_FLAG_ECC, ecc)
    }

    pub fn set_label(&mut self, label: &[u8]) -> UpdateResult {
        let label = String::from_utf8_lossy(label).into_owned();
        form_field!(self, label, ENSEMBLE_FLAG_LABEL, label)
    }

    pub fn set_nb_services(&mut self, nb_services: u8) -> UpdateResult {
        form_field!(self, nb_services, ENSEMBLE_FLAG_NB_SERVICES, nb_services)
    }

    pub fn set_reconfiguration_count(&mut self, count: u16) -> UpdateResult {
        form_field!(self, reconfiguration_count, ENSEMBLE_FLAG_RCOUNT, count)
    }

    pub fn set_local_time_offset(&mut self, minutes: i32) -> UpdateResult {
        form_field!(self, local_time_offset, ENSEMBLE_FLAG_LTO, minutes)
    }

    pub fn set_international_table_id(&mut self, table_id: u8) -> UpdateResult {
        form_field!(self, international_table_id, ENSEMBLE_FLAG_INTER_TABLE, table_id)
    }
}

pub type ServiceUpdater<'a> = EntityUpdater<'a, Service>;

impl ServiceUpdater<'_> {
    const ENTITY_NAME: &'static str = "service";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & SERVICE_FLAG_REQUIRED == SERVICE_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_country_id(&mut self, country_id: CountryId) -> UpdateResult {
        form_field!(self, country_id, SERVICE_FLAG_COUNTRY_ID, country_id)
    }

    pub fn set_extended_country_code(&mut self, ecc: ExtendedCountryCode) -> UpdateResult {
        if ecc == 0x00 {
            return UpdateResult::NoChange;
        }
        form_field!(self, extended_country_code, SERVICE_FLAG_ECC, ecc)
    }

    pub fn set_label(&mut self, label: &[u8]) -> UpdateResult {
        let label = String::from_utf8_lossy(label).into_owned();
        form_field!(self, label, SERVICE_FLAG_LABEL, label)
    }

    pub fn set_programme_type(&mut self, programme_type: ProgrammeTypeId) -> UpdateResult {
        form_field!(self, programme_type, SERVICE_FLAG_PROGRAMME_TYPE, programme_type)
    }

    pub fn set_language(&mut self, language: LanguageId) -> UpdateResult {
        form_field!(self, language, SERVICE_FLAG_LANGUAGE, language)
    }

    pub fn set_closed_caption(&mut self, closed_caption: ClosedCaptionId) -> UpdateResult {
        form_field!(self, closed_caption, SERVICE_FLAG_CLOSED_CAPTION, closed_caption)
    }
}

pub type ServiceComponentUpdater<'a> = EntityUpdater<'a, ServiceComponent>;

impl ServiceComponentUpdater<'_> {
    const ENTITY_NAME: &'static str = "service-component";

    fn check_is_complete(&mut self) {
        // Completeness is unknowable until the transport mode is known
        if self.state.dirty_field & SERVICE_COMPONENT_FLAG_TRANSPORT_MODE == 0 {
            return;
        }
        let required = match self.data.transport_mode {
            TransportMode::StreamAudio => SERVICE_COMPONENT_FLAG_REQUIRED_AUDIO,
            _ => SERVICE_COMPONENT_FLAG_REQUIRED_DATA,
        };
        let is_complete = self.state.dirty_field & required == required;
        self.mark_complete_if(is_complete);
    }

    pub fn set_label(&mut self, label: &[u8]) -> UpdateResult {
        let label = String::from_utf8_lossy(label).into_owned();
        form_field!(self, label, SERVICE_COMPONENT_FLAG_LABEL, label)
    }

    pub fn set_transport_mode(&mut self, transport_mode: TransportMode) -> UpdateResult {
        // A component with a data service type can never be audio
        if self.state.dirty_field & SERVICE_COMPONENT_FLAG_DATA_TYPE != 0
            && transport_mode == TransportMode::StreamAudio
        {
            return self.conflict("service-component transport_mode conflicts with data type");
        }
        form_field!(self, transport_mode, SERVICE_COMPONENT_FLAG_TRANSPORT_MODE, transport_mode)
    }

    pub fn set_audio_service_type(&mut self, audio_service_type: AudioServiceType) -> UpdateResult {
        if self.set_transport_mode(TransportMode::StreamAudio) == UpdateResult::Conflict {
            return UpdateResult::Conflict;
        }
        if self.state.dirty_field & SERVICE_COMPONENT_FLAG_DATA_TYPE != 0 {
            return self.conflict("service-component audio type conflicts with data type");
        }
        form_field!(self, audio_service_type, SERVICE_COMPONENT_FLAG_AUDIO_TYPE, audio_service_type)
    }

    pub fn set_data_service_type(&mut self, data_service_type: DataServiceType) -> UpdateResult {
        // only possible in stream or packet data mode
        if self.state.dirty_field & SERVICE_COMPONENT_FLAG_AUDIO_TYPE != 0 {
            return self.conflict("service-component data type conflicts with audio type");
        }
        form_field!(self, data_service_type, SERVICE_COMPONENT_FLAG_DATA_TYPE, data_service_type)
    }

    pub fn set_subchannel(&mut self, subchannel_id: SubchannelId) -> UpdateResult {
        let result = form_field!(self, subchannel_id, SERVICE_COMPONENT_FLAG_SUBCHANNEL, subchannel_id);
        self.links.subchannel_to_component.insert(
            subchannel_id,
            (self.data.service_reference, self.data.component_id),
        );
        result
    }

    pub fn set_global_id(&mut self, global_id: ServiceComponentGlobalId) -> UpdateResult {
        let result = form_field!(self, global_id, SERVICE_COMPONENT_FLAG_GLOBAL_ID, global_id);
        self.links.global_id_to_component.insert(
            global_id,
            (self.data.service_reference, self.data.component_id),
        );
        result
    }

    pub fn service_reference(&self) -> ServiceId {
        self.data.service_reference
    }
}

pub type SubchannelUpdater<'a> = EntityUpdater<'a, Subchannel>;

impl SubchannelUpdater<'_> {
    const ENTITY_NAME: &'static str = "subchannel";

    fn check_is_complete(&mut self) {
        // Cant tell if it is complete since it depends on the protection type
        if self.state.dirty_field & SUBCHANNEL_FLAG_IS_UEP == 0 {
            return;
        }
        let required = if self.data.is_uep {
            SUBCHANNEL_FLAG_REQUIRED_UEP
        } else {
            SUBCHANNEL_FLAG_REQUIRED_EEP
        };
        let is_complete = self.state.dirty_field & required == required;
        self.mark_complete_if(is_complete);
    }

    pub fn set_start_address(&mut self, start_address: u16) -> UpdateResult {
        if self.state.dirty_field & SUBCHANNEL_FLAG_LENGTH != 0
            && start_address + self.data.length > NB_CAPACITY_UNITS
        {
            return self.conflict("subchannel start address overflows the CIF capacity");
        }
        form_field!(self, start_address, SUBCHANNEL_FLAG_START_ADDRESS, start_address)
    }

    pub fn set_length(&mut self, length: u16) -> UpdateResult {
        if self.state.dirty_field & SUBCHANNEL_FLAG_START_ADDRESS != 0
            && self.data.start_address + length > NB_CAPACITY_UNITS
        {
            return self.conflict("subchannel length overflows the CIF capacity");
        }
        form_field!(self, length, SUBCHANNEL_FLAG_LENGTH, length)
    }

    pub fn set_is_uep(&mut self, is_uep: bool) -> UpdateResult {
        form_field!(self, is_uep, SUBCHANNEL_FLAG_IS_UEP, is_uep)
    }

    pub fn set_uep_prot_index(&mut self, uep_prot_index: u8) -> UpdateResult {
        if self.set_is_uep(true) == UpdateResult::Conflict {
            return UpdateResult::Conflict;
        }
        form_field!(self, uep_prot_index, SUBCHANNEL_FLAG_UEP_PROT_INDEX, uep_prot_index)
    }

    pub fn set_eep_prot_level(&mut self, eep_prot_level: u8) -> UpdateResult {
        if self.set_is_uep(false) == UpdateResult::Conflict {
            return UpdateResult::Conflict;
        }
        form_field!(self, eep_prot_level, SUBCHANNEL_FLAG_EEP_PROT_LEVEL, eep_prot_level)
    }

    pub fn set_eep_type(&mut self, eep_type: EepType) -> UpdateResult {
        if self.set_is_uep(false) == UpdateResult::Conflict {
            return UpdateResult::Conflict;
        }
        form_field!(self, eep_type, SUBCHANNEL_FLAG_EEP_TYPE, eep_type)
    }

    pub fn set_fec_scheme(&mut self, fec_scheme: u8) -> UpdateResult {
        form_field!(self, fec_scheme, SUBCHANNEL_FLAG_FEC_SCHEME, fec_scheme)
    }
}

pub type LinkServiceUpdater<'a> = EntityUpdater<'a, LinkService>;

impl LinkServiceUpdater<'_> {
    const ENTITY_NAME: &'static str = "link-service";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & LINK_FLAG_REQUIRED == LINK_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_is_active_link(&mut self, is_active_link: bool) -> UpdateResult {
        form_field!(self, is_active_link, LINK_FLAG_ACTIVE, is_active_link)
    }

    pub fn set_is_hard_link(&mut self, is_hard_link: bool) -> UpdateResult {
        form_field!(self, is_hard_link, LINK_FLAG_HARD, is_hard_link)
    }

    pub fn set_is_international(&mut self, is_international: bool) -> UpdateResult {
        form_field!(self, is_international, LINK_FLAG_INTERNATIONAL, is_international)
    }

    pub fn set_service_reference(&mut self, service_reference: ServiceId) -> UpdateResult {
        let result = form_field!(self, service_reference, LINK_FLAG_SERVICE_REF, service_reference);
        self.links.lsn_to_service.insert(self.data.id, service_reference);
        result
    }
}

pub type FmServiceUpdater<'a> = EntityUpdater<'a, FmService>;

impl FmServiceUpdater<'_> {
    const ENTITY_NAME: &'static str = "fm-service";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & FM_FLAG_REQUIRED == FM_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_linkage_set_number(&mut self, linkage_set_number: LinkageSetNumber) -> UpdateResult {
        form_field!(self, linkage_set_number, FM_FLAG_LSN, linkage_set_number)
    }

    pub fn set_is_time_compensated(&mut self, is_time_compensated: bool) -> UpdateResult {
        form_field!(self, is_time_compensated, FM_FLAG_TIME_COMP, is_time_compensated)
    }

    pub fn add_frequency(&mut self, frequency: FrequencyKhz) -> UpdateResult {
        let is_added = self.data.frequencies.insert(frequency);
        self.state.dirty_field |= FM_FLAG_FREQ;
        if is_added {
            self.stats.nb_updates += 1;
        }
        self.check_is_complete();
        if is_added {
            UpdateResult::Success
        } else {
            UpdateResult::NoChange
        }
    }
}

pub type DrmServiceUpdater<'a> = EntityUpdater<'a, DrmService>;

impl DrmServiceUpdater<'_> {
    const ENTITY_NAME: &'static str = "drm-service";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & FM_FLAG_REQUIRED == FM_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_linkage_set_number(&mut self, linkage_set_number: LinkageSetNumber) -> UpdateResult {
        form_field!(self, linkage_set_number, FM_FLAG_LSN, linkage_set_number)
    }

    pub fn set_is_time_compensated(&mut self, is_time_compensated: bool) -> UpdateResult {
        form_field!(self, is_time_compensated, FM_FLAG_TIME_COMP, is_time_compensated)
    }

    pub fn add_frequency(&mut self, frequency: FrequencyKhz) -> UpdateResult {
        let is_added = self.data.frequencies.insert(frequency);
        self.state.dirty_field |= FM_FLAG_FREQ;
        if is_added {
            self.stats.nb_updates += 1;
        }
        self.check_is_complete();
        if is_added {
            UpdateResult::Success
        } else {
            UpdateResult::NoChange
        }
    }
}

pub type AmssServiceUpdater<'a> = EntityUpdater<'a, AmssService>;

impl AmssServiceUpdater<'_> {
    const ENTITY_NAME: &'static str = "amss-service";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & AMSS_FLAG_REQUIRED == AMSS_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_is_time_compensated(&mut self, is_time_compensated: bool) -> UpdateResult {
        form_field!(self, is_time_compensated, AMSS_FLAG_TIME_COMP, is_time_compensated)
    }

    pub fn add_frequency(&mut self, frequency: FrequencyKhz) -> UpdateResult {
        let is_added = self.data.frequencies.insert(frequency);
        self.state.dirty_field |= AMSS_FLAG_FREQ;
        if is_added {
            self.stats.nb_updates += 1;
        }
        self.check_is_complete();
        if is_added {
            UpdateResult::Success
        } else {
            UpdateResult::NoChange
        }
    }
}

pub type OtherEnsembleUpdater<'a> = EntityUpdater<'a, OtherEnsemble>;

impl OtherEnsembleUpdater<'_> {
    const ENTITY_NAME: &'static str = "other-ensemble";

    fn check_is_complete(&mut self) {
        let is_complete = self.state.dirty_field & OE_FLAG_REQUIRED == OE_FLAG_REQUIRED;
        self.mark_complete_if(is_complete);
    }

    pub fn set_country_id(&mut self, country_id: CountryId) -> UpdateResult {
        form_field!(self, country_id, OE_FLAG_COUNTRY_ID, country_id)
    }

    pub fn set_is_continuous_output(&mut self, is_continuous_output: bool) -> UpdateResult {
        form_field!(self, is_continuous_output, OE_FLAG_CONT_OUT, is_continuous_output)
    }

    pub fn set_is_geographically_adjacent(&mut self, is_adjacent: bool) -> UpdateResult {
        form_field!(self, is_geographically_adjacent, OE_FLAG_GEO_ADJ, is_adjacent)
    }

    pub fn set_is_transmission_mode_i(&mut self, is_mode_i: bool) -> UpdateResult {
        form_field!(self, is_transmission_mode_i, OE_FLAG_MODE_I, is_mode_i)
    }

    pub fn set_frequency(&mut self, frequency: FrequencyKhz) -> UpdateResult {
        form_field!(self, frequency, OE_FLAG_FREQ, frequency)
    }
}

/// Owns the database and the per entity dirty state. All FIG handlers write
/// through this type; readers take the same mutex the radio wraps it in.
pub struct DabDatabaseUpdater {
    db: DabDatabase,
    stats: DatabaseUpdaterStatistics,
    ensemble_state: EntityState,
    service_states: BTreeMap<ServiceId, EntityState>,
    component_states: BTreeMap<(ServiceId, ServiceComponentId), EntityState>,
    subchannel_states: BTreeMap<SubchannelId, EntityState>,
    link_service_states: BTreeMap<LinkageSetNumber, EntityState>,
    fm_states: BTreeMap<FmId, EntityState>,
    drm_states: BTreeMap<DrmId, EntityState>,
    amss_states: BTreeMap<AmssId, EntityState>,
    other_ensemble_states: BTreeMap<EnsembleId, EntityState>,
}

impl Default for DabDatabaseUpdater {
    fn default() -> Self {
        Self::new()
    }
}

fn ensure_state<K: Ord + Copy>(
    states: &mut BTreeMap<K, EntityState>,
    stats: &mut DatabaseUpdaterStatistics,
    key: K,
) {
    if !states.contains_key(&key) {
        states.insert(key, EntityState::default());
        stats.nb_pending += 1;
        stats.nb_total += 1;
    }
}

impl DabDatabaseUpdater {
    pub fn new() -> Self {
        let mut updater = Self {
            db: DabDatabase::default(),
            stats: DatabaseUpdaterStatistics::default(),
            ensemble_state: EntityState::default(),
            service_states: BTreeMap::new(),
            component_states: BTreeMap::new(),
            subchannel_states: BTreeMap::new(),
            link_service_states: BTreeMap::new(),
            fm_states: BTreeMap::new(),
            drm_states: BTreeMap::new(),
            amss_states: BTreeMap::new(),
            other_ensemble_states: BTreeMap::new(),
        };
        // The ensemble entity always exists
        updater.stats.nb_total += 1;
        updater.stats.nb_pending += 1;
        updater
    }

    pub fn database(&self) -> &DabDatabase {
        &self.db
    }

    pub fn statistics(&self) -> DatabaseUpdaterStatistics {
        self.stats
    }

    pub fn ensemble_updater(&mut self) -> EnsembleUpdater<'_> {
        EntityUpdater {
            data: &mut self.db.ensemble,
            state: &mut self.ensemble_state,
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn service_updater(&mut self, reference: ServiceId) -> ServiceUpdater<'_> {
        ensure_state(&mut self.service_states, &mut self.stats, reference);
        let data = self.db.services.entry(reference).or_insert_with(|| Service {
            reference,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.service_states.get_mut(&reference).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn service_component_updater(
        &mut self,
        service_reference: ServiceId,
        component_id: ServiceComponentId,
    ) -> ServiceComponentUpdater<'_> {
        let key = (service_reference, component_id);
        ensure_state(&mut self.component_states, &mut self.stats, key);
        let data = self
            .db
            .service_components
            .entry(key)
            .or_insert_with(|| ServiceComponent {
                service_reference,
                component_id,
                ..Default::default()
            });
        EntityUpdater {
            data,
            state: self.component_states.get_mut(&key).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    /// Resolves a component through its ensemble wide SCId, if the mapping
    /// has been announced yet.
    pub fn service_component_updater_by_global_id(
        &mut self,
        global_id: ServiceComponentGlobalId,
    ) -> Option<ServiceComponentUpdater<'_>> {
        let (service_reference, component_id) =
            *self.db.links.global_id_to_component.get(&global_id)?;
        Some(self.service_component_updater(service_reference, component_id))
    }

    /// Resolves a component through its linked subchannel, if announced.
    pub fn service_component_updater_by_subchannel(
        &mut self,
        subchannel_id: SubchannelId,
    ) -> Option<ServiceComponentUpdater<'_>> {
        let (service_reference, component_id) =
            *self.db.links.subchannel_to_component.get(&subchannel_id)?;
        Some(self.service_component_updater(service_reference, component_id))
    }

    pub fn subchannel_updater(&mut self, id: SubchannelId) -> SubchannelUpdater<'_> {
        ensure_state(&mut self.subchannel_states, &mut self.stats, id);
        let data = self.db.subchannels.entry(id).or_insert_with(|| Subchannel {
            id,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.subchannel_states.get_mut(&id).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn link_service_updater(&mut self, id: LinkageSetNumber) -> LinkServiceUpdater<'_> {
        ensure_state(&mut self.link_service_states, &mut self.stats, id);
        let data = self.db.link_services.entry(id).or_insert_with(|| LinkService {
            id,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.link_service_states.get_mut(&id).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn fm_service_updater(&mut self, rds_pi_code: FmId) -> FmServiceUpdater<'_> {
        ensure_state(&mut self.fm_states, &mut self.stats, rds_pi_code);
        let data = self.db.fm_services.entry(rds_pi_code).or_insert_with(|| FmService {
            rds_pi_code,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.fm_states.get_mut(&rds_pi_code).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn drm_service_updater(&mut self, drm_code: DrmId) -> DrmServiceUpdater<'_> {
        ensure_state(&mut self.drm_states, &mut self.stats, drm_code);
        let data = self.db.drm_services.entry(drm_code).or_insert_with(|| DrmService {
            drm_code,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.drm_states.get_mut(&drm_code).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn amss_service_updater(&mut self, amss_code: AmssId) -> AmssServiceUpdater<'_> {
        ensure_state(&mut self.amss_states, &mut self.stats, amss_code);
        let data = self.db.amss_services.entry(amss_code).or_insert_with(|| AmssService {
            amss_code,
            ..Default::default()
        });
        EntityUpdater {
            data,
            state: self.amss_states.get_mut(&amss_code).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn other_ensemble_updater(&mut self, reference: EnsembleId) -> OtherEnsembleUpdater<'_> {
        ensure_state(&mut self.other_ensemble_states, &mut self.stats, reference);
        let data = self
            .db
            .other_ensembles
            .entry(reference)
            .or_insert_with(|| OtherEnsemble {
                reference,
                ..Default::default()
            });
        EntityUpdater {
            data,
            state: self.other_ensemble_states.get_mut(&reference).expect("state just inserted"),
            stats: &mut self.stats,
            links: &mut self.db.links,
        }
    }

    pub fn is_ensemble_complete(&self) -> bool {
        self.ensemble_state.is_complete
    }

    pub fn is_service_complete(&self, reference: ServiceId) -> bool {
        self.service_states.get(&reference).map(|s| s.is_complete).unwrap_or(false)
    }

    pub fn is_service_component_complete(
        &self,
        service_reference: ServiceId,
        component_id: ServiceComponentId,
    ) -> bool {
        self.component_states
            .get(&(service_reference, component_id))
            .map(|s| s.is_complete)
            .unwrap_or(false)
    }

    pub fn is_subchannel_complete(&self, id: SubchannelId) -> bool {
        self.subchannel_states.get(&id).map(|s| s.is_complete).unwrap_or(false)
    }

    /// Clones out a database containing only the complete entities.
    pub fn extract_completed_database(&self) -> DabDatabase {
        let mut dest = DabDatabase::default();
        if self.ensemble_state.is_complete {
            dest.ensemble = self.db.ensemble.clone();
        }
        for (key, state) in &self.service_states {
            if state.is_complete {
                dest.services.insert(*key, self.db.services[key].clone());
            }
        }
        for (key, state) in &self.component_states {
            if state.is_complete {
                dest.service_components.insert(*key, self.db.service_components[key].clone());
            }
        }
        for (key, state) in &self.subchannel_states {
            if state.is_complete {
                dest.subchannels.insert(*key, self.db.subchannels[key].clone());
            }
        }
        for (key, state) in &self.link_service_states {
            if state.is_complete {
                dest.link_services.insert(*key, self.db.link_services[key].clone());
            }
        }
        for (key, state) in &self.fm_states {
            if state.is_complete {
                dest.fm_services.insert(*key, self.db.fm_services[key].clone());
            }
        }
        for (key, state) in &self.drm_states {
            if state.is_complete {
                dest.drm_services.insert(*key, self.db.drm_services[key].clone());
            }
        }
        for (key, state) in &self.amss_states {
            if state.is_complete {
                dest.amss_services.insert(*key, self.db.amss_services[key].clone());
            }
        }
        for (key, state) in &self.other_ensemble_states {
            if state.is_complete {
                dest.other_ensembles.insert(*key, self.db.other_ensembles[key].clone());
            }
        }
        dest.links = self.db.links.clone();
        dest
    }
}
