use anyhow::{Context, Result};
use clap::Parser;
use std::fs;
use std::path::PathBuf;
use wavebridge::audio::fifo::{BlockFifo, Wait};
use wavebridge::audio::tone;
use wavebridge::config::DatapathConfig;
use wavebridge::datapath::Datapath;
use wavebridge::hal::Codec;
use wavebridge::sim::{LoopExchange, PcmCodec, SharedTrim, SimClock};

#[derive(Parser, Debug)]
#[command(name = "simulate_link")]
#[command(about = "Run the audio datapath against a simulated wireless link and oscillator")]
struct Args {
    /// TOML datapath configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of frames to stream
    #[arg(short, long, default_value_t = 500)]
    frames: u32,

    /// Initial oscillator error in ppm (positive = local audio clock fast)
    #[arg(short, long, default_value_t = 120.0)]
    drift_ppm: f64,

    /// Report every Nth frame that arrived (0 = report only at the end)
    #[arg(short, long, default_value_t = 50)]
    report_every: u32,

    /// Drop every Nth frame as a missed packet (0 = lossless)
    #[arg(short, long, default_value_t = 0)]
    lose_every: u32,

    /// Test tone frequency in Hz
    #[arg(long, default_value_t = 440)]
    tone_hz: u32,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            DatapathConfig::from_toml(&text)?
        }
        None => DatapathConfig::default(),
    };

    let clock = SimClock::new(0);
    let trim = SharedTrim::new(config.trim.center);
    let exchange = LoopExchange::new();

    let mut datapath = Datapath::new(
        config.clone(),
        Box::new(PcmCodec),
        Box::new(clock.clone()),
        Box::new(trim.clone()),
        Box::new(exchange.clone()),
    )?;
    datapath.init()?;

    let capture = BlockFifo::new(4, config.block_samples_stereo() * 2)?;
    datapath.start(capture.clone())?;

    // Stereo tone frames carry a continuous waveform across the run.
    let period = tone::generate(args.tone_hz, config.sample_rate_hz, 0.5)?;
    let mono_per_frame = config.frame_samples_stereo() / 2;
    let mut mono = vec![0i16; mono_per_frame];
    let mut tone_pos = 0usize;

    let mut codec = PcmCodec;
    let mut frame_bytes = vec![0u8; config.frame_samples_stereo() * 2];

    // One trim unit corrects ns_per_unit nanoseconds over a measurement
    // window, i.e. a fixed ppm gain.
    let trim_gain_ppm =
        config.trim.ns_per_unit as f64 / 1_000.0 / config.drift.meas_period_us as f64 * 1e6;
    let block_ns = config.block_us as f64 * 1_000.0;
    let frame_ns = config.frame_us as f64 * 1_000.0;

    // Frames arrive on the sender's ideal schedule; block boundaries on
    // the local oscillator's, which responds to the applied trim.
    let mut next_frame_ns = frame_ns;
    let mut next_block_ns = block_ns;
    let mut frames_sent = 0u32;

    while frames_sent < args.frames {
        if next_frame_ns <= next_block_ns {
            let ts_us = (next_frame_ns / 1_000.0) as u32;
            clock.set(ts_us);

            frames_sent += 1;
            let lost = args.lose_every > 0 && frames_sent % args.lose_every == 0;
            if lost {
                datapath.stream_out(None, ts_us, false);
            } else {
                tone::fill_continuous(&mut mono, &period, &mut tone_pos)?;
                let mut stereo = Vec::with_capacity(mono.len() * 2);
                for &s in &mono {
                    stereo.push(s);
                    stereo.push(s);
                }
                codec.encode(&stereo, &mut frame_bytes)?;
                datapath.stream_out(Some(&frame_bytes), ts_us, false);
            }
            next_frame_ns += frame_ns;

            // The wireless-send side: drain captured blocks.
            while let Ok((slot, _size)) = capture.take(Wait::None) {
                capture.release(slot)?;
            }

            if args.report_every > 0 && frames_sent % args.report_every == 0 {
                report(frames_sent, &datapath, &exchange, &trim);
            }
        } else {
            let ts_us = (next_block_ns / 1_000.0) as u32;
            clock.set(ts_us);
            exchange.tick(ts_us)?;

            let eff_ppm = args.drift_ppm
                + (trim.get() as f64 - config.trim.center as f64) * trim_gain_ppm;
            next_block_ns += block_ns / (1.0 + eff_ppm * 1e-6);
        }
    }

    println!("--- final ---");
    report(frames_sent, &datapath, &exchange, &trim);

    datapath.stop()?;
    Ok(())
}

fn report(frame: u32, datapath: &Datapath, exchange: &LoopExchange, trim: &SharedTrim) {
    let stats = datapath.stats();
    let drift = exchange
        .drift_state()
        .map(|s| format!("{s:?}"))
        .unwrap_or_else(|| "-".to_string());
    println!(
        "frame {frame:5}  drift {drift:6}  trim {:5}  pres {:?}  \
         prod {} cons {} underruns {}",
        trim.get(),
        datapath.pres_state(),
        stats.total_prod_blocks,
        stats.total_cons_blocks,
        stats.total_underruns,
    );
}
