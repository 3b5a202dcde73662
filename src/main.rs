use anyhow::{Context, bail};
use clap::{Arg, ArgAction, ArgMatches, Command, value_parser};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};
use tracing_subscriber::filter::LevelFilter;
use upcast::backend::{MediaBackend, default_backend};
use upcast::config::{JobConfig, app_name, version};
use upcast::convert::ScaleFilter;
use upcast::encoder::RateControl;
use upcast::logging::Logger;
use upcast::muxer::MuxerConfig;
use upcast::pipeline::{HealthAlert, HealthMonitor, PipelineHealth, TranscodeReport, Transcoder};
use upcast::utils::path::{extension_for, output_path};
use upcast::utils::sos::SignalOfStop;

fn cli() -> Command {
    Command::new(app_name())
        .version(version())
        .author(env!("CARGO_PKG_AUTHORS"))
        .about(env!("CARGO_PKG_DESCRIPTION"))
        .arg(
            Arg::new("input")
                .value_name("INPUT")
                .help("Media files to transcode.")
                .required_unless_present("list-codecs")
                .num_args(1..)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("output")
                .short('o')
                .long("output")
                .value_name("PATH")
                .help("Output file for a single input, output directory for several.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("config")
                .long("config")
                .value_name("FILE")
                .help("JSON job file; command line options override it.")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("format")
                .long("format")
                .value_name("NAME")
                .help("Output container (mp4, matroska, mov, ...). Empty guesses from the output name."),
        )
        .arg(
            Arg::new("video-codec")
                .long("video-codec")
                .value_name("NAME")
                .help("Video encoder name."),
        )
        .arg(
            Arg::new("audio-codec")
                .long("audio-codec")
                .value_name("NAME")
                .help("Audio encoder name, `copy` to pass samples through."),
        )
        .arg(
            Arg::new("crf")
                .long("crf")
                .value_name("Q")
                .help("Constant quality factor, 0 is lossless.")
                .value_parser(value_parser!(u32))
                .conflicts_with("bitrate"),
        )
        .arg(
            Arg::new("bitrate")
                .long("bitrate")
                .value_name("BPS")
                .help("Target video bitrate in bits per second.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("scale")
                .long("scale")
                .value_name("N")
                .help("Upscale factor of the built-in enhancer, 1 = passthrough.")
                .value_parser(value_parser!(u32).range(1..=8)),
        )
        .arg(
            Arg::new("filter")
                .long("filter")
                .value_name("FILTER")
                .help("Scaling filter of the enhancer.")
                .value_parser(["nearest", "bilinear"])
                .ignore_case(true),
        )
        .arg(
            Arg::new("max-frames")
                .long("max-frames")
                .value_name("N")
                .help("Stop after N video frames.")
                .value_parser(value_parser!(u64)),
        )
        .arg(
            Arg::new("start")
                .long("start")
                .value_name("SECONDS")
                .help("Skip to this position before transcoding.")
                .value_parser(value_parser!(f64)),
        )
        .arg(
            Arg::new("jobs")
                .short('j')
                .long("jobs")
                .value_name("N")
                .help("Files transcoded at once, 0 = one per CPU.")
                .value_parser(value_parser!(usize)),
        )
        .arg(
            Arg::new("no-audio")
                .long("no-audio")
                .help("Write video only.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-codecs")
                .long("list-codecs")
                .help("Print the encoders the media backend provides and exit.")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("More logging (repeat for debug output).")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .help("Only log errors.")
                .action(ArgAction::SetTrue)
                .conflicts_with("verbose"),
        )
}

fn init_logging(matches: &ArgMatches) {
    let level = if matches.get_flag("quiet") {
        LevelFilter::ERROR
    } else {
        match matches.get_count("verbose") {
            0 => LevelFilter::INFO,
            1 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// Fold the command line into the job file settings.
fn apply_overrides(job: &mut JobConfig, matches: &ArgMatches) -> anyhow::Result<()> {
    if let Some(format) = matches.get_one::<String>("format") {
        job.output.format = format.clone();
    }
    if let Some(codec) = matches.get_one::<String>("video-codec") {
        job.output.video.codec = codec.clone();
    }
    if let Some(&q) = matches.get_one::<u32>("crf") {
        job.output.video.rate_control = RateControl::Quality(q);
    }
    if let Some(&bps) = matches.get_one::<u64>("bitrate") {
        job.output.video.rate_control = RateControl::Bitrate(bps);
    }
    if matches.get_flag("no-audio") {
        job.output.audio = None;
        job.decoder.enable_audio = false;
    } else if let Some(codec) = matches.get_one::<String>("audio-codec") {
        let audio = job.output.audio.get_or_insert_with(Default::default);
        audio.stream_copy = codec == "copy";
        audio.codec = codec.clone();
    }
    if let Some(&scale) = matches.get_one::<u32>("scale") {
        job.enhance.scale = scale;
    }
    if let Some(filter) = matches.get_one::<String>("filter") {
        job.enhance.filter = match filter.to_lowercase().as_str() {
            "nearest" => ScaleFilter::Nearest,
            _ => ScaleFilter::Bilinear,
        };
    }
    if let Some(&frames) = matches.get_one::<u64>("max-frames") {
        job.max_frames = Some(frames);
    }
    if let Some(&start) = matches.get_one::<f64>("start") {
        job.start = start;
    }
    if let Some(&jobs) = matches.get_one::<usize>("jobs") {
        job.jobs = jobs;
    }
    job.validate()?;
    Ok(())
}

fn transcode_one(
    backend: Arc<dyn MediaBackend>,
    job: &JobConfig,
    input: &Path,
    output: PathBuf,
    stop: SignalOfStop,
    health: Arc<PipelineHealth>,
) -> anyhow::Result<TranscodeReport> {
    let mut config = job.output.clone();
    config.output_path = output;

    let mut transcoder = Transcoder::new(backend, Logger::global())
        .with_decoder_config(job.decoder.clone())
        .with_enhancer(job.enhance.enhancer())
        .with_start(job.start)
        .with_stop_signal(stop)
        .with_health(health);
    if let Some(frames) = job.max_frames {
        transcoder = transcoder.with_max_frames(frames);
    }
    transcoder
        .run(input, config)
        .with_context(|| format!("Failed to transcode {}", input.display()))
}

/// Run every input on a blocking worker, `job.workers()` at a time.
/// Returns the number of failed jobs.
async fn run_jobs(
    backend: Arc<dyn MediaBackend>,
    job: Arc<JobConfig>,
    inputs: Vec<PathBuf>,
    output: Option<PathBuf>,
    stop: SignalOfStop,
) -> anyhow::Result<usize> {
    let semaphore = Arc::new(Semaphore::new(job.workers()));
    let many = inputs.len() > 1;
    let format = MuxerConfig {
        output_path: output.clone().unwrap_or_default(),
        format: job.output.format.clone(),
        ..MuxerConfig::default()
    }
    .format_name()
    .unwrap_or_default();
    let extension = extension_for(&format).to_string();

    let mut handles = Vec::new();
    for input in inputs {
        if stop.cancelled() {
            break;
        }
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let target = output_path(&input, output.as_deref(), many, &extension);

        let health = Arc::new(PipelineHealth::new());
        let (alert_tx, mut alert_rx) = mpsc::channel(16);
        let monitor = tokio::spawn(
            HealthMonitor::new(Arc::clone(&health), alert_tx)
                .with_check_interval(Duration::from_secs(5))
                .run(),
        );
        let name = input.display().to_string();
        tokio::spawn(async move {
            while let Some(alert) = alert_rx.recv().await {
                match alert {
                    HealthAlert::Progress(summary) => log::info!("{}: {}", name, summary),
                    alert => log::warn!("{}: {}", name, alert),
                }
            }
        });

        let backend = Arc::clone(&backend);
        let job = Arc::clone(&job);
        let stop = stop.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            let result = transcode_one(backend, &job, &input, target, stop, health);
            monitor.abort();
            (input, result)
        });
        handles.push(handle);
    }

    let mut failures = 0;
    for handle in handles {
        match handle.await {
            Ok((_, Ok(report))) => log::info!("Done: {}", report),
            Ok((input, Err(err))) => {
                log::error!("{}: {:#}", input.display(), err);
                failures += 1;
            }
            Err(err) => {
                log::error!("Worker panicked: {}", err);
                failures += 1;
            }
        }
    }
    Ok(failures)
}

/// One encoder per line under a header naming the backend.
fn codec_listing(backend: &str, encoders: &[String]) -> String {
    let mut out = format!("Encoders of the {} backend:\n", backend);
    for encoder in encoders {
        out.push_str("  ");
        out.push_str(encoder);
        out.push('\n');
    }
    out
}

fn run(matches: &ArgMatches) -> anyhow::Result<i32> {
    if matches.get_flag("list-codecs") {
        let backend = default_backend().context("No media backend available")?;
        print!("{}", codec_listing(backend.name(), &backend.encoders()));
        return Ok(0);
    }

    let mut job = match matches.get_one::<PathBuf>("config") {
        Some(path) => JobConfig::load(path)
            .with_context(|| format!("Cannot load job file {}", path.display()))?,
        None => JobConfig::default(),
    };
    apply_overrides(&mut job, matches)?;

    let inputs: Vec<PathBuf> = matches
        .get_many::<PathBuf>("input")
        .map(|values| values.cloned().collect())
        .unwrap_or_default();
    if inputs.is_empty() {
        bail!("no input given");
    }
    let output = matches.get_one::<PathBuf>("output").cloned();

    let backend = default_backend().context("No media backend available")?;
    log::debug!("Using the {} backend", backend.name());

    // finish the running jobs cleanly on SIGINT, SIGTERM or SIGHUP
    let stop = SignalOfStop::new();
    let handler_stop = stop.clone();
    ctrlc::set_handler(move || {
        log::warn!("Interrupted, finalizing outputs...");
        handler_stop.cancel();
    })
    .context("Error setting Ctrl-C handler")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Cannot start the runtime")?;
    let failures = runtime.block_on(run_jobs(backend, Arc::new(job), inputs, output, stop.clone()))?;

    Ok(if stop.cancelled() {
        130
    } else if failures > 0 {
        1
    } else {
        0
    })
}

fn main() {
    let matches = cli().get_matches();
    init_logging(&matches);

    let code = match run(&matches) {
        Ok(code) => code,
        Err(err) => {
            log::error!("{:#}", err);
            1
        }
    };
    process::exit(code);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn test_overrides() {
        let matches = cli()
            .try_get_matches_from([
                "upcast", "a.mp4", "--crf", "0", "--scale", "2", "--filter", "NEAREST",
                "--audio-codec", "copy", "--max-frames", "10", "-j", "3",
            ])
            .unwrap();
        let mut job = JobConfig::default();
        apply_overrides(&mut job, &matches).unwrap();

        assert_eq!(job.output.video.rate_control, RateControl::Quality(0));
        assert_eq!(job.enhance.scale, 2);
        assert_eq!(job.enhance.filter, ScaleFilter::Nearest);
        assert!(job.output.audio.as_ref().unwrap().stream_copy);
        assert_eq!(job.max_frames, Some(10));
        assert_eq!(job.workers(), 3);
    }

    #[test]
    fn test_rate_modes_conflict() {
        assert!(
            cli()
                .try_get_matches_from(["upcast", "a.mp4", "--crf", "20", "--bitrate", "1000"])
                .is_err()
        );
    }

    #[test]
    fn test_list_codecs_needs_no_input() {
        let matches = cli().try_get_matches_from(["upcast", "--list-codecs"]).unwrap();
        assert!(matches.get_flag("list-codecs"));
        assert!(cli().try_get_matches_from(["upcast"]).is_err());

        let listing = codec_listing("ffmpeg", &[String::from("libx264"), String::from("aac")]);
        assert_eq!(listing, "Encoders of the ffmpeg backend:\n  libx264\n  aac\n");
    }

    #[test]
    fn test_no_audio() {
        let matches = cli()
            .try_get_matches_from(["upcast", "a.mp4", "b.mp4", "--no-audio"])
            .unwrap();
        let mut job = JobConfig::default();
        apply_overrides(&mut job, &matches).unwrap();
        assert!(job.output.audio.is_none());
        assert!(!job.decoder.enable_audio);
    }
}
