use super::mot_assembler::MotAssembler;
use super::mot_entities::*;
use crate::msc::msc_data_group::MscDataGroup;
use radio_utils::lru_cache::LruCache;

/// Transport objects tracked in parallel before the least recently updated
/// assembly is silently dropped.
pub const DEFAULT_MAX_TRANSPORT_OBJECTS: usize = 10;

/// Header core: body size, header size, content type and sub type.
const MOT_HEADER_CORE_BYTES: usize = 7;

const PARAM_ID_EXPIRE_TIME: u8 = 4;
const PARAM_ID_TRIGGER_TIME: u8 = 5;
const PARAM_ID_CONTENT_NAME: u8 = 12;

/// Per transport id assembly state.
#[derive(Default)]
struct AssemblerTable {
    header: MotAssembler,
    body: MotAssembler,
    is_emitted: bool,
}

/// Builds MOT entities from MSC data group segments.
///
/// Header and body segments of each transport id are assembled separately;
/// the entity is emitted once both are complete and the header's declared
/// body size matches the reassembled body. Directory mode segments are
/// assembled but not interpreted; conditional access segments are skipped.
pub struct MotProcessor {
    assembler_tables: LruCache<MotTransportId, AssemblerTable>,
    pub total_entities: u32,
    pub total_conditional_access_segments: u32,
    pub total_directory_segments: u32,
    pub total_malformed_headers: u32,
}

impl Default for MotProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TRANSPORT_OBJECTS)
    }
}

impl MotProcessor {
    pub fn new(max_transport_objects: usize) -> Self {
        Self {
            assembler_tables: LruCache::new(max_transport_objects),
            total_entities: 0,
            total_conditional_access_segments: 0,
            total_directory_segments: 0,
            total_malformed_headers: 0,
        }
    }

    /// Consumes one MOT carrying MSC data group. Returns the completed
    /// entity when this segment finished its assembly.
    pub fn process_data_group(&mut self, group: &MscDataGroup<'_>) -> Option<MotEntity> {
        let Some(data_type) = MotDataType::from_data_group_type(group.data_group_type) else {
            log::debug!(
                target: "mot-processor",
                "data group type {} does not carry MOT", group.data_group_type,
            );
            return None;
        };
        let user_access = group.user_access.or_else(|| {
            log::warn!(target: "mot-processor", "MOT data group without user access field");
            None
        })?;
        let transport_id = user_access.transport_id.or_else(|| {
            log::warn!(target: "mot-processor", "MOT data group without transport id");
            None
        })?;
        let segment = group.segment.or_else(|| {
            log::warn!(target: "mot-processor", "MOT data group without segment field");
            None
        })?;

        match data_type {
            MotDataType::EcmEmmData | MotDataType::ScrambledBody => {
                // Conditional access is out of scope, count and skip
                self.total_conditional_access_segments += 1;
                return None;
            }
            MotDataType::UncompressedDirectory | MotDataType::CompressedDirectory => {
                self.total_directory_segments += 1;
            }
            MotDataType::Header | MotDataType::UnscrambledBody => {}
        }

        // The segment payload carries its own repetition/size prefix
        let data = group.data;
        if data.len() < 2 {
            log::warn!(target: "mot-processor", "MOT segment too short");
            return None;
        }
        let segment_size = (usize::from(data[0] & 0b00011111) << 8) | usize::from(data[1]);
        let payload = &data[2..];
        if segment_size != payload.len() {
            log::warn!(
                target: "mot-processor",
                "MOT segment size {} does not match payload {}", segment_size, payload.len(),
            );
            return None;
        }

        let table = self.assembler_tables.find_or_insert_with(&transport_id, AssemblerTable::default);
        let assembler = match data_type {
            MotDataType::Header => &mut table.header,
            MotDataType::UnscrambledBody => &mut table.body,
            // Directory segments reuse the header slot of their transport id
            MotDataType::UncompressedDirectory | MotDataType::CompressedDirectory => &mut table.header,
            _ => unreachable!("conditional access handled above"),
        };

        if !assembler.add_segment(segment.segment_number as usize, payload) {
            return None;
        }
        if segment.is_last_segment {
            assembler.set_total_segments(segment.segment_number as usize + 1);
        }

        if data_type == MotDataType::Header || data_type == MotDataType::UnscrambledBody {
            return self.check_entity_complete(transport_id);
        }
        None
    }

    fn check_entity_complete(&mut self, transport_id: MotTransportId) -> Option<MotEntity> {
        let table = self.assembler_tables.get_mut(&transport_id)?;
        if table.is_emitted || !table.header.check_complete() || !table.body.check_complete() {
            return None;
        }

        let header_bytes = table.header.data().to_vec();
        let body = table.body.data().to_vec();
        let Some(header) = parse_mot_header(&header_bytes) else {
            self.total_malformed_headers += 1;
            return None;
        };
        if header.body_size as usize != body.len() {
            log::warn!(
                target: "mot-processor",
                "transport {} declared body size {} but assembled {} bytes",
                transport_id, header.body_size, body.len(),
            );
            return None;
        }

        if let Some(table) = self.assembler_tables.get_mut(&transport_id) {
            table.is_emitted = true;
        }
        self.total_entities += 1;
        log::info!(
            target: "mot-processor",
            "MOT entity transport={} type={}/{} name={:?} size={}",
            transport_id, header.content_type, header.content_sub_type,
            header.content_name.name, header.body_size,
        );
        Some(MotEntity { transport_id, header, body })
    }
}

/// Parses the MOT header entity: the 7 byte core followed by extension
/// parameters with their four length classes.
pub fn parse_mot_header(buf: &[u8]) -> Option<MotHeaderEntity> {
    if buf.len() < MOT_HEADER_CORE_BYTES {
        log::warn!(target: "mot-processor", "MOT header shorter than its core");
        return None;
    }
    let mut header = MotHeaderEntity {
        body_size: (u32::from(buf[0]) << 20)
            | (u32::from(buf[1]) << 12)
            | (u32::from(buf[2]) << 4)
            | u32::from(buf[3] >> 4),
        header_size: (u16::from(buf[3] & 0x0F) << 9)
            | (u16::from(buf[4]) << 1)
            | u16::from(buf[5] >> 7),
        content_type: (buf[5] & 0b01111110) >> 1,
        content_sub_type: (u16::from(buf[5] & 0b1) << 8) | u16::from(buf[6]),
        ..Default::default()
    };

    if header.header_size as usize != buf.len() {
        log::warn!(
            target: "mot-processor",
            "MOT header size field {} does not match {} assembled bytes",
            header.header_size, buf.len(),
        );
    }

    let mut curr_byte = MOT_HEADER_CORE_BYTES;
    while curr_byte < buf.len() {
        let pli = (buf[curr_byte] & 0b11000000) >> 6;
        let param_id = buf[curr_byte] & 0b00111111;
        curr_byte += 1;

        let nb_data_bytes = match pli {
            0b00 => 0usize,
            0b01 => 1,
            0b10 => 4,
            _ => {
                // Explicit length, one or two bytes
                if curr_byte >= buf.len() {
                    return None;
                }
                let first = buf[curr_byte];
                curr_byte += 1;
                if first & 0b10000000 != 0 {
                    if curr_byte >= buf.len() {
                        return None;
                    }
                    let second = buf[curr_byte];
                    curr_byte += 1;
                    (usize::from(first & 0b01111111) << 8) | usize::from(second)
                } else {
                    usize::from(first)
                }
            }
        };
        if curr_byte + nb_data_bytes > buf.len() {
            log::warn!(
                target: "mot-processor",
                "MOT parameter {} data overflows the header", param_id,
            );
            return None;
        }
        let data = &buf[curr_byte..curr_byte + nb_data_bytes];
        curr_byte += nb_data_bytes;

        match param_id {
            PARAM_ID_CONTENT_NAME => {
                if !data.is_empty() {
                    header.content_name = MotContentName {
                        exists: true,
                        charset: (data[0] & 0b11110000) >> 4,
                        name: String::from_utf8_lossy(&data[1..]).into_owned(),
                    };
                }
            }
            PARAM_ID_TRIGGER_TIME => {
                header.trigger_time = parse_mot_utc_time(data);
            }
            PARAM_ID_EXPIRE_TIME => {
                header.expire_time = parse_mot_utc_time(data);
            }
            param_id => {
                header.user_app_params.push(MotHeaderExtensionParameter {
                    param_id,
                    data: data.to_vec(),
                });
            }
        }
    }

    Some(header)
}

/// UTC time parameter: a validity flag, then MJD and UTC in the short or
/// long form. An unset validity flag means "now" and carries no time.
fn parse_mot_utc_time(data: &[u8]) -> MotUtcTime {
    let mut time = MotUtcTime::default();
    if data.len() < 4 {
        return time;
    }
    let validity = (data[0] & 0b10000000) != 0;
    if !validity {
        return time;
    }
    let mjd = (u32::from(data[0] & 0b01111111) << 10)
        | (u32::from(data[1]) << 2)
        | u32::from(data[2] >> 6);
    let is_long_form = (data[2] & 0b00001000) != 0;
    let hours = ((data[2] & 0b00000111) << 2) | (data[3] >> 6);
    let minutes = data[3] & 0b00111111;
    let (seconds, milliseconds) = if is_long_form && data.len() >= 6 {
        let seconds = (data[4] & 0b11111100) >> 2;
        let milliseconds = (u16::from(data[4] & 0b11) << 8) | u16::from(data[5]);
        (seconds, milliseconds)
    } else {
        (0, 0)
    };

    let (year, month, day) = mjd_to_calendar_date(mjd);
    MotUtcTime {
        exists: true,
        year,
        month,
        day,
        hours,
        minutes,
        seconds,
        milliseconds,
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::msc::msc_data_group::test_support::make_mot_data_group;
    use crate::msc::msc_data_group::parse_msc_data_group;

    fn push_segment(
        processor: &mut MotProcessor,
        data_group_type: u8,
        transport_id: u16,
        segment_number: u16,
        is_last: bool,
        payload: &[u8],
    ) -> Option<MotEntity> {
        let group_bytes = make_mot_data_group(
            data_group_type,
            0,
            transport_id,
            segment_number,
            is_last,
            payload,
        );
        let group = parse_msc_data_group(&group_bytes).unwrap();
        processor.process_data_group(&group)
    }

    #[test]
    fn body_segments_in_any_order_yield_one_entity() {
        let mut processor = MotProcessor::default();

        // Body: 128 bytes of distinct patterns in four segments of 32
        let body: Vec<u8> = (0u8..4).flat_map(|i| vec![0x10 * (i + 1); 32]).collect();
        let body_segments = make_segments(&body, 32);
        let header = make_mot_header(128, 2, 0x001, "test.jpg");
        let header_segments = make_segments(&header, header.len());

        let mut entities = Vec::new();
        entities.extend(push_segment(&mut processor, 3, 0x4242, 0, true, &header_segments[0]));
        for &index in &[2usize, 0, 3, 1] {
            let is_last = index == 3;
            entities.extend(push_segment(
                &mut processor, 4, 0x4242, index as u16, is_last, &body_segments[index],
            ));
        }

        assert_eq!(entities.len(), 1);
        let entity = &entities[0];
        assert_eq!(entity.transport_id, 0x4242);
        assert_eq!(entity.body, body);
        assert_eq!(entity.header.body_size, 128);
        assert_eq!(entity.header.content_type, 2);
        assert_eq!(entity.header.content_sub_type, 0x001);
        assert_eq!(entity.header.content_name.name, "test.jpg");
    }

    #[test]
    fn permuted_delivery_yields_identical_entities() {
        let body: Vec<u8> = (0u8..96).collect();
        let body_segments = make_segments(&body, 48);
        let header = make_mot_header(96, 2, 1, "image.png");
        let header_segments = make_segments(&header, header.len());

        let mut orders: Vec<Vec<(u8, u16, bool, usize)>> = vec![
            vec![(3, 0, true, 0), (4, 0, false, 0), (4, 1, true, 1)],
            vec![(4, 1, true, 1), (4, 0, false, 0), (3, 0, true, 0)],
            vec![(4, 0, false, 0), (3, 0, true, 0), (4, 1, true, 1)],
        ];

        let mut results = Vec::new();
        for order in orders.drain(..) {
            let mut processor = MotProcessor::default();
            let mut entities = Vec::new();
            for (group_type, segment_number, is_last, payload_index) in order {
                let payload = if group_type == 3 {
                    &header_segments[payload_index]
                } else {
                    &body_segments[payload_index]
                };
                entities.extend(push_segment(
                    &mut processor, group_type, 7, segment_number, is_last, payload,
                ));
            }
            assert_eq!(entities.len(), 1);
            results.push(entities[0].clone());
        }
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    #[test]
    fn mismatched_body_size_suppresses_the_entity() {
        let mut processor = MotProcessor::default();

        let body: Vec<u8> = (0u8..64).collect();
        let body_segments = make_segments(&body, 64);
        // Header declares 128 bytes but only 64 arrive
        let header = make_mot_header(128, 2, 1, "short.bin");
        let header_segments = make_segments(&header, header.len());

        assert!(push_segment(&mut processor, 3, 1, 0, true, &header_segments[0]).is_none());
        assert!(push_segment(&mut processor, 4, 1, 0, true, &body_segments[0]).is_none());
    }

    #[test]
    fn conditional_access_segments_are_skipped() {
        let mut processor = MotProcessor::default();
        assert!(push_segment(&mut processor, 1, 9, 0, true, &[0, 2, 0xAA, 0xBB]).is_none());
        assert!(push_segment(&mut processor, 5, 9, 0, true, &[0, 2, 0xCC, 0xDD]).is_none());
        assert_eq!(processor.total_conditional_access_segments, 2);
    }

    #[test]
    fn lru_eviction_drops_stale_incomplete_assemblies() {
        let mut processor = MotProcessor::new(2);

        let body: Vec<u8> = (0u8..32).collect();
        let body_segments = make_segments(&body, 32);
        let header = make_mot_header(32, 2, 1, "a.bin");
        let header_segments = make_segments(&header, header.len());

        // Transport 1 starts but is displaced by transports 2 and 3
        assert!(push_segment(&mut processor, 3, 1, 0, true, &header_segments[0]).is_none());
        assert!(push_segment(&mut processor, 3, 2, 0, true, &header_segments[0]).is_none());
        assert!(push_segment(&mut processor, 3, 3, 0, true, &header_segments[0]).is_none());
        // Transport 1's body alone can no longer complete the entity
        assert!(push_segment(&mut processor, 4, 1, 0, true, &body_segments[0]).is_none());

        // Transport 3 still completes
        let entity = push_segment(&mut processor, 4, 3, 0, true, &body_segments[0]);
        assert_eq!(entity.unwrap().transport_id, 3);
    }
}
