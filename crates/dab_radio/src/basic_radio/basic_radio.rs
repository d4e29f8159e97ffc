use super::basic_dab_plus_channel::BasicDabPlusChannel;
use super::basic_thread_pool::BasicThreadPool;
use crate::dab_radio_parameters::{get_dab_radio_parameters, DabRadioParameters};
use crate::database::entities::{AudioServiceType, Service, SubchannelId, TransportMode};
use crate::database::updater::DabDatabaseUpdater;
use crate::fic::fic_decoder::FicDecoder;
use crate::fic::fig_database_handler::FigDatabaseProcessor;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_core::viterbi_decoder::SoftDecisionBit;
use radio_utils::observable::Observable;
use radio_utils::profiler::Profiler;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};

/// Binds the digital decoding chain of one ensemble.
///
/// Each demodulated frame is split into its FIB groups and CIFs. The FIC is
/// decoded on the calling thread so FIG dispatch stays strictly ordered;
/// the audio subchannels fan out over the thread pool with one task per
/// channel and a barrier at the frame boundary. Channels are created as
/// soon as the database announces a complete DAB+ component.
///
/// The database is shared under a single mutex: FIG handlers write through
/// it, scrapers and user interfaces read through
/// [`BasicRadio::database_updater`].
pub struct BasicRadio {
    params: DabRadioParameters,
    thread_pool: BasicThreadPool,
    database_updater: Arc<Mutex<DabDatabaseUpdater>>,
    fic_decoder: FicDecoder,
    fig_processor: FigDatabaseProcessor,
    channels: BTreeMap<SubchannelId, Arc<Mutex<BasicDabPlusChannel>>>,
    obs_on_service: Observable<Service>,
    obs_on_dab_plus_channel: Observable<SubchannelId>,
    notified_services: BTreeSet<u32>,
    pub total_frames: u32,
}

impl BasicRadio {
    pub fn new(transmission_mode: DabTransmissionMode, nb_threads: usize) -> Self {
        let params = get_dab_radio_parameters(transmission_mode);
        Self {
            thread_pool: BasicThreadPool::new(nb_threads),
            database_updater: Arc::new(Mutex::new(DabDatabaseUpdater::new())),
            fic_decoder: FicDecoder::new(params.nb_fibs_in_fic / params.nb_cifs_in_msc),
            fig_processor: FigDatabaseProcessor::new(),
            channels: BTreeMap::new(),
            obs_on_service: Observable::new(),
            obs_on_dab_plus_channel: Observable::new(),
            notified_services: BTreeSet::new(),
            total_frames: 0,
            params,
        }
    }

    pub fn parameters(&self) -> &DabRadioParameters {
        &self.params
    }

    /// Shared handle to the database; readers lock it for the duration of
    /// their access.
    pub fn database_updater(&self) -> Arc<Mutex<DabDatabaseUpdater>> {
        self.database_updater.clone()
    }

    pub fn fic_decoder(&self) -> &FicDecoder {
        &self.fic_decoder
    }

    pub fn fig_processor(&self) -> &FigDatabaseProcessor {
        &self.fig_processor
    }

    /// Notified once per service as it completes in the database.
    pub fn on_service(&mut self) -> &mut Observable<Service> {
        &mut self.obs_on_service
    }

    /// Notified once per created DAB+ audio channel; fetch the channel with
    /// [`BasicRadio::get_dab_plus_channel`] to subscribe to its streams.
    pub fn on_dab_plus_channel(&mut self) -> &mut Observable<SubchannelId> {
        &mut self.obs_on_dab_plus_channel
    }

    pub fn get_dab_plus_channel(
        &self,
        subchannel_id: SubchannelId,
    ) -> Option<Arc<Mutex<BasicDabPlusChannel>>> {
        self.channels.get(&subchannel_id).cloned()
    }

    pub fn dab_plus_channels(&self) -> impl Iterator<Item = (&SubchannelId, &Arc<Mutex<BasicDabPlusChannel>>)> {
        self.channels.iter()
    }

    /// Consumes the soft bits of one OFDM frame.
    pub fn process(&mut self, frame_bits: &[SoftDecisionBit]) {
        assert!(
            frame_bits.len() == self.params.nb_bits_per_frame,
            "Frame has {} soft bits but the transmission mode requires {}",
            frame_bits.len(),
            self.params.nb_bits_per_frame,
        );
        self.total_frames += 1;
        let profiler = Profiler::get();

        // FIB groups decode on this thread so database updates keep the
        // arrival order of the FIGs
        let fic_scope = profiler.scope("fic_decode");
        let fic_bits = &frame_bits[..self.params.nb_bits_in_fic];
        for (group_index, group_bits) in
            fic_bits.chunks_exact(self.params.nb_bits_per_fig).enumerate()
        {
            let fibs = self.fic_decoder.decode_fib_group(group_bits, group_index);
            if fibs.is_empty() {
                continue;
            }
            let mut updater = self.database_updater.lock().unwrap();
            for fib in &fibs {
                self.fig_processor.process_fib(fib.as_slice(), &mut updater);
            }
        }

        drop(fic_scope);

        self.refresh_services();
        self.refresh_channels();

        // One task per audio subchannel, processing the frame's CIFs in
        // order; wait_all makes the frame boundary a barrier
        let _msc_scope = profiler.scope("msc_decode");
        let msc_bits = Arc::new(frame_bits[self.params.nb_bits_in_fic..].to_vec());
        let nb_bits_per_cif = self.params.nb_bits_per_cif;
        let nb_cifs = self.params.nb_cifs_in_msc;
        for channel in self.channels.values() {
            let channel = channel.clone();
            let msc_bits = msc_bits.clone();
            self.thread_pool.push_task(move || {
                let mut channel = channel.lock().unwrap();
                for cif_index in 0..nb_cifs {
                    let start = cif_index * nb_bits_per_cif;
                    channel.process_cif(&msc_bits[start..start + nb_bits_per_cif]);
                }
            });
        }
        self.thread_pool.wait_all();
    }

    fn refresh_services(&mut self) {
        let updater = self.database_updater.lock().unwrap();
        let mut completed = Vec::new();
        for (&reference, service) in &updater.database().services {
            if updater.is_service_complete(reference) && !self.notified_services.contains(&reference) {
                completed.push(service.clone());
            }
        }
        drop(updater);
        for service in completed {
            self.notified_services.insert(service.reference);
            log::info!(
                target: "basic-radio",
                "service {:04X} complete: {}", service.reference, service.label,
            );
            self.obs_on_service.notify(&service);
        }
    }

    fn refresh_channels(&mut self) {
        let updater = self.database_updater.lock().unwrap();
        let database = updater.database();

        let mut new_subchannels = Vec::new();
        for (key, component) in &database.service_components {
            if component.transport_mode != TransportMode::StreamAudio {
                continue;
            }
            if component.audio_service_type != AudioServiceType::DabPlus {
                continue;
            }
            if !updater.is_service_component_complete(key.0, key.1) {
                continue;
            }
            let subchannel_id = component.subchannel_id;
            if self.channels.contains_key(&subchannel_id)
                || !updater.is_subchannel_complete(subchannel_id)
            {
                continue;
            }
            new_subchannels.push(database.subchannels[&subchannel_id].clone());
        }
        drop(updater);

        for subchannel in new_subchannels {
            let subchannel_id = subchannel.id;
            match BasicDabPlusChannel::new(&subchannel) {
                Ok(channel) => {
                    log::info!(
                        target: "basic-radio",
                        "created DAB+ channel on subchannel {} ({} CU at {})",
                        subchannel_id, subchannel.length, subchannel.start_address,
                    );
                    self.channels.insert(subchannel_id, Arc::new(Mutex::new(channel)));
                    self.obs_on_dab_plus_channel.notify(&subchannel_id);
                }
                Err(error) => {
                    log::error!(
                        target: "basic-radio",
                        "subchannel {} has undecodable protection: {}", subchannel_id, error,
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fic::fic_decoder::test_support::{encode_fib_group, make_fib, make_fib_group};
    use crate::msc::aac_frame_processor::test_support::make_super_frame;
    use crate::msc::msc_subchannel_decoder::test_support::encode_logical_frame;
    use crate::msc::time_deinterleaver::{DELAY_TABLE, INTERLEAVE_DEPTH};
    use dab_core::puncture_codes::{get_eep_profile, EepType};
    use dab_core::viterbi_decoder::SOFT_DECISION_PUNCTURED;
    use std::sync::atomic::{AtomicU32, Ordering};

    // Mode I: 4 FIB groups and 4 CIFs of 55296 bits per frame
    const SUBCHANNEL_SIZE_CU: usize = 6;
    const SUBCHANNEL_BITS: usize = SUBCHANNEL_SIZE_CU * 64;

    /// FIG 0/1 (subchannel 0, EEP 3-A, 6 CU) plus FIG 0/2 (service 0xC221
    /// with one DAB+ component) in one FIB.
    fn make_announcement_fib() -> [u8; 32] {
        let descriptor: u32 = (1 << 15) | (2 << 10) | (SUBCHANNEL_SIZE_CU as u32);
        let fig_0_1 = [
            0x05,
            0x01,
            (descriptor >> 24) as u8,
            (descriptor >> 16) as u8,
            (descriptor >> 8) as u8,
            descriptor as u8,
        ];
        let fig_0_2 = [0x06, 0x02, 0xC2, 0x21, 0x01, 63, 0b10];
        let mut payload = Vec::new();
        payload.extend_from_slice(&fig_0_1);
        payload.extend_from_slice(&fig_0_2);
        make_fib(&payload)
    }

    /// Applies the transmitter side of the time interleaving: the block
    /// sent at time u carries bit j of source block u + DELAY_TABLE[j].
    fn interleave_blocks(src: &[Vec<SoftDecisionBit>]) -> Vec<Vec<SoftDecisionBit>> {
        let nb_bits = src[0].len();
        (0..src.len())
            .map(|u| {
                (0..nb_bits)
                    .map(|j| {
                        let t = u + DELAY_TABLE[j % INTERLEAVE_DEPTH];
                        if t < src.len() {
                            src[t][j]
                        } else {
                            SOFT_DECISION_PUNCTURED
                        }
                    })
                    .collect()
            })
            .collect()
    }

    /// One access unit whose payload is a data stream element carrying an
    /// empty XPAD, so the PAD layer sees a quiet channel.
    fn make_access_unit_payload(length: usize) -> Vec<u8> {
        let mut payload = vec![4 << 5, 2, 0, 0];
        payload.resize(length, 0x11);
        payload
    }

    #[test]
    fn frame_processing_builds_channels_and_decodes_audio() {
        let mut radio = BasicRadio::new(DabTransmissionMode::I, 2);
        let params = *radio.parameters();
        assert_eq!(params.nb_bits_per_fig, 2304);

        let channel_created = Arc::new(AtomicU32::new(0));
        radio.on_dab_plus_channel().subscribe({
            let channel_created = channel_created.clone();
            move |&id| {
                assert_eq!(id, 0);
                channel_created.fetch_add(1, Ordering::SeqCst);
            }
        });

        // The subchannel carries one DAB+ super frame: 8 kbit/s, 24 bytes
        // per logical frame, preceded by enough priming for the
        // deinterleaver and padded out with punctured frames
        let au0 = make_access_unit_payload(40);
        let au1 = make_access_unit_payload(61);
        let super_frames =
            make_super_frame(24, false, true, &[au0.as_slice(), au1.as_slice()]);

        let profile = get_eep_profile(3, EepType::A, SUBCHANNEL_SIZE_CU).unwrap();
        let schedule = profile.puncture_schedule();
        let zero_frame = vec![0u8; 24];
        let mut logical_blocks: Vec<Vec<SoftDecisionBit>> = Vec::new();
        for _ in 0..INTERLEAVE_DEPTH - 1 {
            logical_blocks.push(encode_logical_frame(&zero_frame, &schedule));
        }
        for frame in &super_frames {
            logical_blocks.push(encode_logical_frame(frame, &schedule));
        }
        // Tail padding so the interleaver can emit the last super frames
        for _ in 0..INTERLEAVE_DEPTH {
            logical_blocks.push(encode_logical_frame(&zero_frame, &schedule));
        }
        let tx_blocks = interleave_blocks(&logical_blocks);

        // Build the radio frames: one valid FIB group announcing the
        // ensemble structure, the rest of the FIC unusable; each frame
        // carries four CIFs
        let announcement = make_announcement_fib();
        let group = make_fib_group([announcement, announcement, announcement]);
        let fic_group = encode_fib_group(&group);

        let audio_params = Arc::new(Mutex::new(Vec::new()));
        let audio_data = Arc::new(Mutex::new(Vec::new()));

        let mut tx_iter = tx_blocks.iter();
        let nb_frames = tx_blocks.len().div_ceil(params.nb_cifs_in_msc);
        for frame_index in 0..nb_frames {
            let mut frame_bits =
                vec![SOFT_DECISION_PUNCTURED; params.nb_bits_per_frame];
            frame_bits[..fic_group.len()].copy_from_slice(&fic_group);

            for cif_index in 0..params.nb_cifs_in_msc {
                let Some(block) = tx_iter.next() else {
                    break;
                };
                let start = params.nb_bits_in_fic + cif_index * params.nb_bits_per_cif;
                frame_bits[start..start + SUBCHANNEL_BITS].copy_from_slice(block);
            }

            radio.process(&frame_bits);

            // Subscribe to the channel as soon as it exists
            if frame_index == 0 {
                assert_eq!(channel_created.load(Ordering::SeqCst), 1);
                let channel = radio.get_dab_plus_channel(0).expect("channel exists");
                let mut channel = channel.lock().unwrap();
                channel.on_aac_params().subscribe({
                    let audio_params = audio_params.clone();
                    move |params| audio_params.lock().unwrap().push(*params)
                });
                channel.on_audio_data().subscribe({
                    let audio_data = audio_data.clone();
                    move |audio| audio_data.lock().unwrap().push(audio.data.clone())
                });
            }
        }

        let audio_params = audio_params.lock().unwrap();
        assert_eq!(audio_params.len(), 1);
        assert_eq!(audio_params[0].sample_rate_hz, 32_000);
        assert!(audio_params[0].is_sbr);

        let audio_data = audio_data.lock().unwrap();
        assert_eq!(audio_data.len(), 2);
        assert_eq!(audio_data[0], au0);
        assert_eq!(audio_data[1], au1);

        // The database registered the announced structure
        let updater = radio.database_updater();
        let updater = updater.lock().unwrap();
        assert!(updater.is_subchannel_complete(0));
        assert!(updater.is_service_component_complete(0xC221, 0));
    }

    #[test]
    fn unusable_fic_creates_no_channels() {
        let mut radio = BasicRadio::new(DabTransmissionMode::I, 1);
        let params = *radio.parameters();
        let frame_bits = vec![SOFT_DECISION_PUNCTURED; params.nb_bits_per_frame];
        radio.process(&frame_bits);
        assert_eq!(radio.dab_plus_channels().count(), 0);
        assert!(radio.fic_decoder().total_fibs_crc_errors > 0);
    }
}
