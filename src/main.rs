mod audio;
mod cli;
mod config;
mod dsp;
mod encode;
mod error;
mod output;
mod pipeline;
mod protocol;
mod render;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::select;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Duration;

use audio::frame::SampleFrame;
use audio::session::{Session, SessionSummary};
use audio::source::{CaptureSource, FrameSource, SerialSource};
use cli::{AnalysisArgs, Cli, Command};
use config::Config;
use output::{progress_bar, Outputs};
use pipeline::Pipeline;
use protocol::decoder::DecoderOptions;
use protocol::packet::Packet;

/// Pause between attempts to reopen a vanished serial device.
const RECONNECT_DELAY: Duration = Duration::from_secs(1);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let cli = Cli::parse();

    let mut config = match config::find_config(cli.config.as_deref()) {
        Some(path) => match config::load_config(&path) {
            Ok(cfg) => {
                log::info!("Loaded config from {}", path.display());
                cfg
            }
            Err(err) if cli.config.is_some() => return Err(err),
            Err(err) => {
                log::warn!("{:#}, using defaults", err);
                Config::default()
            }
        },
        None => Config::default(),
    };

    match cli.command {
        Command::Serial {
            input,
            sample_rate,
            no_crc,
            reconnect,
            analysis,
        } => {
            analysis.apply(&mut config);
            if let Some(rate) = sample_rate {
                config.serial.sample_rate = rate;
            }
            if no_crc {
                config.serial.verify_crc = false;
            }
            config.validate()?;

            let options = DecoderOptions {
                sample_rate: config.serial.sample_rate,
                verify_crc: config.serial.verify_crc,
                max_payload: config.serial.max_payload,
            };
            log::info!(
                "Serial: {} @ {} Hz, crc {}",
                input.display(),
                options.sample_rate,
                if options.verify_crc { "on" } else { "off" }
            );
            if reconnect && input == Path::new("-") {
                bail!("--reconnect needs a device path; stdin cannot be reopened");
            }
            let open = || -> Result<Box<dyn FrameSource>> {
                Ok(Box::new(SerialSource::open(&input, options)?))
            };
            let reopen: Option<&dyn Fn() -> Result<Box<dyn FrameSource>>> =
                if reconnect { Some(&open) } else { None };
            run(open()?, reopen, &config, &analysis, analysis.offline, None)
        }
        Command::Capture {
            input,
            block_size,
            realtime,
            analysis,
        } => {
            analysis.apply(&mut config);
            if let Some(size) = block_size {
                config.capture.block_size = size;
            }
            config.validate()?;

            if !input.exists() {
                bail!("Input file not found: {}", input.display());
            }
            log::info!("Decoding audio...");
            let audio = audio::decode::decode_audio(&input)?;
            let duration = audio.duration_secs();
            let source = CaptureSource::new(
                input.display().to_string(),
                audio,
                config.capture.block_size,
                realtime,
            );
            log::info!(
                "Capture: {} ({:.1}s @ {} Hz)",
                input.display(),
                duration,
                source.sample_rate()
            );
            let total = source.total_samples() as u64;
            // An unpaced file would outrun the ticker, so it is analyzed frame by frame.
            let offline = analysis.offline || !realtime;
            run(Box::new(source), None, &config, &analysis, offline, Some(total))
        }
        Command::Pack {
            input,
            output,
            block_size,
        } => {
            if let Some(size) = block_size {
                config.capture.block_size = size;
            }
            config.validate()?;
            pack(&input, &output, &config)
        }
    }
}

fn run(
    source: Box<dyn FrameSource>,
    reopen: Option<&dyn Fn() -> Result<Box<dyn FrameSource>>>,
    config: &Config,
    args: &AnalysisArgs,
    offline: bool,
    total_samples: Option<u64>,
) -> Result<()> {
    let mut pipeline = Pipeline::new(&config.analysis, &config.pitch)?;
    let mut outputs = Outputs::new(args.json, args.video.as_deref(), &config.render, total_samples)?;
    if !args.json && args.video.is_none() {
        log::info!("No --json or --video output requested; ticks are only logged at debug level");
    }

    let mut source = source;
    loop {
        let session = Session::start(source)?;
        let name = session.name().to_string();
        let result = if offline {
            drain_offline(&session, &mut pipeline, &mut outputs)
        } else {
            drain_ticker(&session, &mut pipeline, &mut outputs, config.render.fps)
        };

        let stopped = session.stop();
        result.with_context(|| format!("Analysis of {} failed", name))?;
        let summary = stopped?;
        log_summary(&summary, pipeline.ticks());

        let Some(reopen) = reopen else {
            break;
        };
        source = reopen_with_retry(&name, reopen);
        log::info!("{}: reopened, analysis state reset", name);
        pipeline.reset();
    }

    outputs.finish()
}

fn reopen_with_retry(
    name: &str,
    reopen: &dyn Fn() -> Result<Box<dyn FrameSource>>,
) -> Box<dyn FrameSource> {
    loop {
        match reopen() {
            Ok(source) => return source,
            Err(err) => {
                log::warn!("{}: {:#}, retrying", name, err);
                std::thread::sleep(RECONNECT_DELAY);
            }
        }
    }
}

fn log_summary(summary: &SessionSummary, ticks: u64) {
    log::info!(
        "{}: {} frames, {} samples, {} ticks",
        summary.source,
        summary.frames,
        summary.samples,
        ticks
    );
    if let Some(stats) = summary.decoder {
        log::info!(
            "decoder: {} packets, {} crc errors, {} framing errors, {} dropped, {} bytes skipped",
            stats.packets,
            stats.crc_errors,
            stats.framing_errors,
            stats.dropped_packets,
            stats.bytes_skipped
        );
    }
}

/// Every frame is analyzed, advancing time by the frame's own duration.
fn drain_offline(session: &Session, pipeline: &mut Pipeline, outputs: &mut Outputs) -> Result<()> {
    for frame in session.frames().iter() {
        outputs.received(frame.len());
        let dt = frame.duration_secs();
        process(frame, dt, pipeline, outputs)?;
    }
    Ok(())
}

/// One analysis per tick on the newest frame; older pending frames are dropped.
fn drain_ticker(
    session: &Session,
    pipeline: &mut Pipeline,
    outputs: &mut Outputs,
    fps: u32,
) -> Result<()> {
    let period = Duration::from_secs_f64(1.0 / fps as f64);
    let dt = period.as_secs_f32();
    let ticker = crossbeam_channel::tick(period);
    let mut pending: Option<SampleFrame> = None;
    let mut superseded = 0u64;

    loop {
        select! {
            recv(session.frames()) -> msg => match msg {
                Ok(frame) => {
                    outputs.received(frame.len());
                    if pending.replace(frame).is_some() {
                        superseded += 1;
                    }
                }
                Err(_) => break,
            },
            recv(ticker) -> _ => match pending.take() {
                Some(frame) => process(frame, dt, pipeline, outputs)?,
                None => outputs.hold(pipeline, dt)?,
            },
        }
    }

    if let Some(frame) = pending.take() {
        process(frame, dt, pipeline, outputs)?;
    }
    if superseded > 0 {
        log::debug!("{} frames superseded before their tick", superseded);
    }
    Ok(())
}

fn process(frame: SampleFrame, dt: f32, pipeline: &mut Pipeline, outputs: &mut Outputs) -> Result<()> {
    let report = pipeline.tick(frame, dt);
    log::debug!(
        "tick {}: peak {:?} Hz at {:?} dB, pitch {} ({:.2})",
        report.tick,
        report.peak_hz,
        report.peak_db,
        report.pitch.note_name.as_deref().unwrap_or("-"),
        report.pitch.confidence
    );
    outputs.emit(&report, pipeline, dt)
}

/// Writes `input` as a packet stream that `pcmscope serial` can replay.
fn pack(input: &Path, output: &Path, config: &Config) -> Result<()> {
    let block_size = config.capture.block_size;
    let limit = config.serial.max_payload / 2;
    if block_size > limit {
        bail!(
            "Block size {} exceeds the {} samples a packet can carry",
            block_size,
            limit
        );
    }

    log::info!("Decoding audio...");
    let audio = audio::decode::decode_audio(input)?;
    if audio.sample_rate == 0 {
        bail!("Decoder reported a zero sample rate for {}", input.display());
    }
    if audio.sample_rate != config.serial.sample_rate {
        log::warn!(
            "{} is {} Hz; replay it with --sample-rate {}",
            input.display(),
            audio.sample_rate,
            audio.sample_rate
        );
    }

    let file = std::fs::File::create(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;
    let mut writer = BufWriter::new(file);
    let pb = progress_bar(audio.samples.len() as u64, "samples");

    let mut packets = 0u32;
    for (index, block) in audio.samples.chunks(block_size).enumerate() {
        let position = (index * block_size) as u64;
        // The wire timestamp is 32-bit and wraps after about 71 minutes.
        let timestamp = (position * 1_000_000 / audio.sample_rate as u64) as u32;
        let bytes = Packet::from_samples(packets, timestamp, block)
            .encode()
            .with_context(|| format!("Failed to encode packet {}", packets))?;
        writer
            .write_all(&bytes)
            .with_context(|| format!("Failed to write {}", output.display()))?;
        packets = packets.wrapping_add(1);
        pb.inc(block.len() as u64);
    }
    writer.flush().context("Failed to flush packet stream")?;
    pb.finish_with_message("Packing complete");

    log::info!("Wrote {} packets to {}", packets, output.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use audio::decode::AudioData;
    use config::RenderConfig;

    fn capture(samples: usize, block_size: usize) -> Box<dyn FrameSource> {
        let audio = AudioData {
            samples: vec![0; samples],
            sample_rate: 16_000,
        };
        Box::new(CaptureSource::new("clip", audio, block_size, false))
    }

    #[test]
    fn ticker_progress_counts_superseded_frames() {
        let config = Config::default();
        let mut pipeline = Pipeline::new(&config.analysis, &config.pitch).unwrap();
        let mut outputs = Outputs::new(false, None, &RenderConfig::default(), Some(5000)).unwrap();

        let session = Session::start(capture(5000, 100)).unwrap();
        drain_ticker(&session, &mut pipeline, &mut outputs, 200).unwrap();
        let summary = session.stop().unwrap();

        assert_eq!(summary.frames, 50);
        assert!(pipeline.ticks() < 50);
        assert_eq!(outputs.progress_position(), Some(5000));
    }

    #[test]
    fn offline_drain_analyzes_every_frame() {
        let config = Config::default();
        let mut pipeline = Pipeline::new(&config.analysis, &config.pitch).unwrap();
        let mut outputs = Outputs::new(false, None, &RenderConfig::default(), Some(3000)).unwrap();

        let session = Session::start(capture(3000, 1000)).unwrap();
        drain_offline(&session, &mut pipeline, &mut outputs).unwrap();
        session.stop().unwrap();

        assert_eq!(pipeline.ticks(), 3);
        assert_eq!(outputs.progress_position(), Some(3000));
    }
}
