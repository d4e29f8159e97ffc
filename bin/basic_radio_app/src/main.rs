use app_helpers::io_buffers::{InputFile, ReadBuffer};
use app_helpers::iq_readers::{IqSampleFormat, RawIqReader, RAW_IQ_MODES};
use app_helpers::threaded_ring_buffer::ThreadedRingBuffer;
use app_helpers::wav_reader::WavIqReader;
use clap::Parser;
use dab_core::dab_transmission_modes::DabTransmissionMode;
use dab_radio::basic_radio::basic_radio::BasicRadio;
use num::complex::Complex32;
use ofdm::ofdm_demodulator::{OfdmDemodulator, OfdmDemodulatorSettings, SoftBit};
use std::sync::Arc;

/// Expected baseband sampling rate of the IQ stream.
const EXPECTED_SAMPLE_RATE_HZ: u32 = 2_048_000;

#[derive(Parser, Debug)]
#[command(author, version, about = "DAB radio decoder for baseband IQ streams", long_about = None)]
struct AppArguments {
    /// DAB transmission mode. Valid modes are \[1,2,3,4\]
    #[arg(short = 'M', long, default_value_t = 1)]
    transmission_mode: u32,
    /// IQ sample encoding: wav or one of the raw modes
    #[arg(short = 'F', long, default_value = "raw_u8")]
    iq_mode: String,
    /// Input filepath. If not provided uses stdin by default.
    #[arg(short, long)]
    input_filepath: Option<String>,
    /// Number of samples to read in blocks from the input
    #[arg(short, long, default_value_t = 65536)]
    block_size: usize,
    /// Threads for the radio decoder pool. 0 selects the hardware parallelism.
    #[arg(long, default_value_t = 0)]
    nb_radio_threads: usize,
    /// Workers for the OFDM symbol pipeline. 0 selects the hardware parallelism.
    #[arg(long, default_value_t = 0)]
    nb_pipeline_threads: usize,
}

fn main() {
    env_logger::init();
    let args = AppArguments::parse();
    if let Err(error) = run(&args) {
        eprintln!("error: {}", error);
        std::process::exit(1);
    }
}

fn open_iq_reader(
    args: &AppArguments,
) -> Result<Box<dyn ReadBuffer<Complex32> + Send>, Box<dyn std::error::Error>> {
    let input: Box<dyn std::io::Read + Send> = match &args.input_filepath {
        None => Box::new(std::io::stdin()),
        Some(filepath) => Box::new(
            std::fs::File::open(filepath)
                .map_err(|error| format!("failed to open input file {}: {}", filepath, error))?,
        ),
    };

    if args.iq_mode == "wav" {
        let reader = WavIqReader::new(input)?;
        let header = reader.header();
        log::info!(
            target: "basic-radio-app",
            "wav input: {:?} {}ch {}Hz {}bit",
            header.format, header.total_channels,
            header.samples_per_second, header.bits_per_sample,
        );
        if header.samples_per_second != EXPECTED_SAMPLE_RATE_HZ {
            return Err(format!(
                "sampling rate mismatch: {} Hz in the file, the receiver requires {} Hz",
                header.samples_per_second, EXPECTED_SAMPLE_RATE_HZ,
            )
            .into());
        }
        return Ok(Box::new(reader));
    }

    let Some(format) = IqSampleFormat::from_mode_str(&args.iq_mode) else {
        return Err(format!(
            "unknown iq mode '{}', expected wav or one of {:?}",
            args.iq_mode, RAW_IQ_MODES,
        )
        .into());
    };
    Ok(Box::new(RawIqReader::new(InputFile::new(input), format)))
}

fn run(args: &AppArguments) -> Result<(), Box<dyn std::error::Error>> {
    let transmission_mode = DabTransmissionMode::try_from(args.transmission_mode)?;
    if args.block_size == 0 {
        return Err("number of samples per block cannot be zero".into());
    }
    let mut iq_reader = open_iq_reader(args)?;

    // OFDM demodulator
    use dab_ofdm::dab_ofdm_carrier_map::get_dab_ofdm_carrier_map;
    use dab_ofdm::dab_ofdm_parameters::get_dab_ofdm_parameters;
    use dab_ofdm::dab_ofdm_phase_reference_symbol::get_dab_ofdm_phase_reference_symbol_fft;

    let ofdm_params = get_dab_ofdm_parameters(transmission_mode);
    let mut carrier_map = vec![0usize; ofdm_params.nb_fft_data_carriers];
    let mut prs_fft = vec![Complex32::default(); ofdm_params.nb_fft];
    get_dab_ofdm_carrier_map(&mut carrier_map, ofdm_params.nb_fft);
    get_dab_ofdm_phase_reference_symbol_fft(&mut prs_fft, transmission_mode);

    let settings = OfdmDemodulatorSettings {
        nb_pipeline_threads: (args.nb_pipeline_threads > 0).then_some(args.nb_pipeline_threads),
        ..Default::default()
    };
    let mut demodulator =
        OfdmDemodulator::with_settings(&ofdm_params, &carrier_map, &prs_fft, settings);

    // Radio with logging observers
    let mut radio = BasicRadio::new(transmission_mode, args.nb_radio_threads);
    let radio_params = *radio.parameters();
    radio.on_service().subscribe(|service| {
        println!(
            "service {:04X}: '{}' programme_type={}",
            service.reference, service.label, service.programme_type,
        );
    });
    radio.on_dab_plus_channel().subscribe(|&subchannel_id| {
        println!("dab+ channel on subchannel {}", subchannel_id);
    });

    // Soft bit hand off between the demodulator and the radio thread
    let bits_buffer = Arc::new(ThreadedRingBuffer::<SoftBit>::new(
        radio_params.nb_bits_per_frame * 4,
    ));
    demodulator.subscribe_bits_out({
        let bits_buffer = bits_buffer.clone();
        move |soft_bits| {
            bits_buffer.write(soft_bits);
        }
    });

    let radio_thread = std::thread::spawn({
        let bits_buffer = bits_buffer.clone();
        move || {
            let mut frame_bits = vec![0 as SoftBit; radio_params.nb_bits_per_frame];
            let mut subscribed_channels = std::collections::BTreeSet::new();
            loop {
                let total_read = bits_buffer.read(&mut frame_bits);
                if total_read < frame_bits.len() {
                    break;
                }
                radio.process(&frame_bits);
                subscribe_to_new_channels(&radio, &mut subscribed_channels);
            }
            radio
        }
    });

    // Sample loop on this thread
    let mut sample_block = vec![Complex32::default(); args.block_size];
    loop {
        let total_read = iq_reader.read(&mut sample_block);
        demodulator.process(&sample_block[..total_read]);
        if total_read < sample_block.len() {
            log::info!(target: "basic-radio-app", "input stream ended");
            break;
        }
    }

    demodulator.stop();
    bits_buffer.close();
    let radio = radio_thread
        .join()
        .map_err(|_| "radio thread should terminate gracefully")?;

    print_summary(&demodulator, &radio);
    Ok(())
}

/// Wires logging observers into every channel as it appears. Runs on the
/// radio thread between frames, so no channel event can be missed.
fn subscribe_to_new_channels(
    radio: &BasicRadio,
    subscribed_channels: &mut std::collections::BTreeSet<u8>,
) {
    let new_ids: Vec<u8> = radio
        .dab_plus_channels()
        .map(|(&id, _)| id)
        .filter(|id| !subscribed_channels.contains(id))
        .collect();
    for id in new_ids {
        subscribed_channels.insert(id);
        let Some(channel) = radio.get_dab_plus_channel(id) else {
            continue;
        };
        let mut channel = channel.lock().unwrap();
        channel.on_aac_params().subscribe(move |params| {
            println!(
                "subchannel {}: audio {}Hz sbr={} ps={} stereo={}",
                id, params.sample_rate_hz, params.is_sbr,
                params.is_parametric_stereo, params.is_stereo,
            );
        });
        channel.on_label_change().subscribe(move |change| {
            println!(
                "subchannel {}: label '{}'",
                id,
                String::from_utf8_lossy(&change.label),
            );
        });
        channel.on_slideshow().subscribe(move |entity| {
            println!(
                "subchannel {}: slideshow '{}' ({} bytes)",
                id, entity.header.content_name.name, entity.body.len(),
            );
        });
        channel.on_mot_entity().subscribe(move |entity| {
            log::info!(
                target: "basic-radio-app",
                "subchannel {}: MOT entity transport={} type={} ({} bytes)",
                id, entity.transport_id, entity.header.content_type, entity.body.len(),
            );
        });
        channel.on_audio_data().subscribe(move |audio| {
            log::debug!(
                target: "basic-radio-app",
                "subchannel {}: access unit of {} bytes", id, audio.data.len(),
            );
        });
    }
}

fn print_summary(demodulator: &OfdmDemodulator, radio: &BasicRadio) {
    println!("frames demodulated: {}", demodulator.total_frames_read);
    println!("frames desynced:    {}", demodulator.total_frames_desync);
    println!("frames decoded:     {}", radio.total_frames);
    println!(
        "fibs: {} valid, {} crc errors",
        radio.fic_decoder().total_fibs_valid,
        radio.fic_decoder().total_fibs_crc_errors,
    );

    let updater = radio.database_updater();
    let updater = updater.lock().unwrap();
    let stats = updater.statistics();
    println!(
        "database: {} complete, {} pending, {} conflicts",
        stats.nb_completed, stats.nb_pending, stats.nb_conflicts,
    );
    let database = updater.database();
    if !database.ensemble.label.is_empty() {
        println!("ensemble: '{}'", database.ensemble.label);
    }
    for (reference, service) in &database.services {
        println!("  service {:04X}: '{}'", reference, service.label);
        for (key, component) in &database.service_components {
            if key.0 != *reference {
                continue;
            }
            println!(
                "    component {}: {:?} subchannel {}",
                component.component_id, component.transport_mode, component.subchannel_id,
            );
        }
    }
}
