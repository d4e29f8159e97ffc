//! Entities of the ensemble database built from the fast information channel.

use std::collections::{BTreeMap, BTreeSet};

pub use dab_core::puncture_codes::EepType;

pub type EnsembleId = u16;
/// 16 bit for programme services, 32 bit for data services.
pub type ServiceId = u32;
/// Component index within a service.
pub type ServiceComponentId = u8;
/// SCId, the ensemble wide service component identifier.
pub type ServiceComponentGlobalId = u16;
pub type SubchannelId = u8;
pub type CountryId = u8;
pub type ExtendedCountryCode = u8;
pub type ProgrammeTypeId = u8;
pub type LanguageId = u8;
pub type ClosedCaptionId = u8;
pub type LinkageSetNumber = u16;
/// RDS programme identification code of a linked FM service.
pub type FmId = u16;
/// 24 bit DRM service identifier.
pub type DrmId = u32;
pub type AmssId = u32;
pub type FrequencyKhz = u32;

/// Subchannel capacity units available in one CIF for transmission mode I.
pub const NB_CAPACITY_UNITS: u16 = 864;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    #[default]
    StreamAudio,
    StreamData,
    PacketData,
    Fidc,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum AudioServiceType {
    #[default]
    Dab,
    DabPlus,
    Unknown,
}

impl AudioServiceType {
    /// From the 6 bit audio service component type field.
    pub fn from_ascty(ascty: u8) -> Self {
        match ascty {
            0 => Self::Dab,
            63 => Self::DabPlus,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum DataServiceType {
    #[default]
    TransparentChannel,
    MpegTransportStream,
    Mot,
    Proprietary,
    Unknown,
}

impl DataServiceType {
    /// From the 6 bit data service component type field.
    pub fn from_dscty(dscty: u8) -> Self {
        match dscty {
            5 => Self::TransparentChannel,
            24 => Self::MpegTransportStream,
            60 => Self::Mot,
            61 => Self::Proprietary,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Ensemble {
    pub reference: EnsembleId,
    pub country_id: CountryId,
    pub extended_country_code: ExtendedCountryCode,
    pub label: String,
    pub nb_services: u8,
    pub reconfiguration_count: u16,
    /// Local time offset in minutes.
    pub local_time_offset: i32,
    pub international_table_id: u8,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Service {
    pub reference: ServiceId,
    pub country_id: CountryId,
    pub extended_country_code: ExtendedCountryCode,
    pub label: String,
    pub programme_type: ProgrammeTypeId,
    pub language: LanguageId,
    pub closed_caption: ClosedCaptionId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ServiceComponent {
    pub service_reference: ServiceId,
    pub component_id: ServiceComponentId,
    pub label: String,
    pub transport_mode: TransportMode,
    pub audio_service_type: AudioServiceType,
    pub data_service_type: DataServiceType,
    pub subchannel_id: SubchannelId,
    pub global_id: ServiceComponentGlobalId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Subchannel {
    pub id: SubchannelId,
    /// Start address in capacity units within one CIF.
    pub start_address: u16,
    /// Size in capacity units.
    pub length: u16,
    pub is_uep: bool,
    /// Index into the UEP protection table, 1..=64.
    pub uep_prot_index: u8,
    /// EEP protection level 1..=4.
    pub eep_prot_level: u8,
    pub eep_type: EepType,
    /// FEC scheme for packet mode, 1 enables the outer RS(204,188) code.
    pub fec_scheme: u8,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LinkService {
    pub id: LinkageSetNumber,
    pub is_active_link: bool,
    pub is_hard_link: bool,
    pub is_international: bool,
    pub service_reference: ServiceId,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FmService {
    pub rds_pi_code: FmId,
    pub linkage_set_number: LinkageSetNumber,
    pub is_time_compensated: bool,
    pub frequencies: BTreeSet<FrequencyKhz>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrmService {
    pub drm_code: DrmId,
    pub linkage_set_number: LinkageSetNumber,
    pub is_time_compensated: bool,
    pub frequencies: BTreeSet<FrequencyKhz>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AmssService {
    pub amss_code: AmssId,
    pub is_time_compensated: bool,
    pub frequencies: BTreeSet<FrequencyKhz>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct OtherEnsemble {
    pub reference: EnsembleId,
    pub country_id: CountryId,
    pub is_continuous_output: bool,
    pub is_geographically_adjacent: bool,
    pub is_transmission_mode_i: bool,
    pub frequency: FrequencyKhz,
}

/// Cross entity references created while the database is being built.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DatabaseLinks {
    pub global_id_to_component: BTreeMap<ServiceComponentGlobalId, (ServiceId, ServiceComponentId)>,
    pub subchannel_to_component: BTreeMap<SubchannelId, (ServiceId, ServiceComponentId)>,
    pub lsn_to_service: BTreeMap<LinkageSetNumber, ServiceId>,
}

/// The ensemble database. Entities are created on first reference from any
/// FIG and filled in incrementally by the updater.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DabDatabase {
    pub ensemble: Ensemble,
    pub services: BTreeMap<ServiceId, Service>,
    pub service_components: BTreeMap<(ServiceId, ServiceComponentId), ServiceComponent>,
    pub subchannels: BTreeMap<SubchannelId, Subchannel>,
    pub link_services: BTreeMap<LinkageSetNumber, LinkService>,
    pub fm_services: BTreeMap<FmId, FmService>,
    pub drm_services: BTreeMap<DrmId, DrmService>,
    pub amss_services: BTreeMap<AmssId, AmssService>,
    pub other_ensembles: BTreeMap<EnsembleId, OtherEnsemble>,
    pub links: DatabaseLinks,
}
