use crate::database::entities::Subchannel;
use crate::mot::mot_entities::MotEntity;
use crate::msc::aac_data_decoder::AacDataDecoder;
use crate::msc::aac_frame_processor::{AacAudioParameters, AacFrameProcessor};
use crate::msc::msc_subchannel_decoder::{MscDecoderError, MscSubchannelDecoder};
use crate::pad::pad_dynamic_label::{DynamicLabelChange, DynamicLabelCommand};
use crate::pad::pad_processor::PadProcessor;
use dab_core::viterbi_decoder::SoftDecisionBit;
use radio_utils::observable::Observable;

/// MOT content type for images, the carrier of slideshows.
const MOT_CONTENT_TYPE_IMAGE: u8 = 2;

/// One decoded AAC access unit together with its audio configuration.
/// The payload goes to the AAC codec collaborator for PCM decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioData {
    pub params: AacAudioParameters,
    pub data: Vec<u8>,
}

/// The complete receive chain of one DAB+ audio subchannel.
///
/// Binds the subchannel decoder, the super frame layer, PAD extraction and
/// the MOT and dynamic label applications, and fans the results out to
/// observers.
pub struct BasicDabPlusChannel {
    subchannel: Subchannel,
    msc_decoder: MscSubchannelDecoder,
    frame_processor: AacFrameProcessor,
    data_decoder: AacDataDecoder,
    pad_processor: PadProcessor,
    obs_on_audio_data: Observable<AudioData>,
    obs_on_aac_params: Observable<AacAudioParameters>,
    obs_on_mot_entity: Observable<MotEntity>,
    obs_on_slideshow: Observable<MotEntity>,
    last_params: Option<AacAudioParameters>,
}

impl BasicDabPlusChannel {
    pub fn new(subchannel: &Subchannel) -> Result<Self, MscDecoderError> {
        let msc_decoder = MscSubchannelDecoder::new(subchannel)?;
        let frame_processor = AacFrameProcessor::new(msc_decoder.nb_decoded_bytes());
        Ok(Self {
            subchannel: subchannel.clone(),
            msc_decoder,
            frame_processor,
            data_decoder: AacDataDecoder::new(),
            pad_processor: PadProcessor::new(),
            obs_on_audio_data: Observable::new(),
            obs_on_aac_params: Observable::new(),
            obs_on_mot_entity: Observable::new(),
            obs_on_slideshow: Observable::new(),
            last_params: None,
        })
    }

    pub fn subchannel(&self) -> &Subchannel {
        &self.subchannel
    }

    pub fn on_audio_data(&mut self) -> &mut Observable<AudioData> {
        &mut self.obs_on_audio_data
    }

    pub fn on_aac_params(&mut self) -> &mut Observable<AacAudioParameters> {
        &mut self.obs_on_aac_params
    }

    /// All completed MOT entities regardless of content type.
    pub fn on_mot_entity(&mut self) -> &mut Observable<MotEntity> {
        &mut self.obs_on_mot_entity
    }

    /// MOT image entities, the payload of the slideshow application.
    pub fn on_slideshow(&mut self) -> &mut Observable<MotEntity> {
        &mut self.obs_on_slideshow
    }

    pub fn on_label_change(&mut self) -> &mut Observable<DynamicLabelChange> {
        self.pad_processor.dynamic_label().on_label_change()
    }

    pub fn on_label_command(&mut self) -> &mut Observable<DynamicLabelCommand> {
        self.pad_processor.dynamic_label().on_command()
    }

    /// Consumes the soft bits of one whole CIF.
    pub fn process_cif(&mut self, cif_bits: &[SoftDecisionBit]) {
        let Some(frame) = self.msc_decoder.decode_cif(cif_bits) else {
            return;
        };
        let Some(result) = self.frame_processor.push_frame(&frame) else {
            return;
        };

        if self.last_params != Some(result.params) {
            self.last_params = Some(result.params);
            self.obs_on_aac_params.notify(&result.params);
        }

        for access_unit in result.access_units {
            let pad = self.data_decoder.process_access_unit(&access_unit);
            self.pad_processor.process(&pad.fpad, &pad.xpad);

            let audio = AudioData {
                params: result.params,
                data: access_unit,
            };
            self.obs_on_audio_data.notify(&audio);
        }

        for entity in self.pad_processor.mot().take_completed_entities() {
            self.obs_on_mot_entity.notify(&entity);
            if entity.header.content_type == MOT_CONTENT_TYPE_IMAGE {
                self.obs_on_slideshow.notify(&entity);
            }
        }
    }

    /// Current Viterbi path metric of the subchannel decoder.
    pub fn path_error(&self) -> i16 {
        self.msc_decoder.path_error()
    }
}
