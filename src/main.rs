//! `sightsing` - sight-singing practice from the command line.
//!
//! Parses and generates MusicXML exercises, renders the reference playback
//! to WAV, mixes a take with the reference, and grades a take. Built with
//! the `device` feature it also plays and records on the default sound
//! devices.

use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
#[cfg(feature = "device")]
use std::time::{Duration, Instant};

use sightsing::audio::wav::{read_wav, write_wav};
#[cfg(feature = "device")]
use sightsing::audio::{AudioContextSlot, DeviceContext, MicrophoneSource};
use sightsing::config::PracticeConfig;
use sightsing::exercise::{
    generate_exercise, ExerciseParams, ExerciseScore, KeyMode, KeySpec, MeterSpec, RangeSpec,
    RhythmStyle,
};
use sightsing::export::{render_reference, write_mix, write_musicxml, MixLevels};
use sightsing::grading::GradingPipeline;
use sightsing::musicxml::{exercise_to_musicxml, parse_with_warnings};
use sightsing::playback::PlaybackMode;
use sightsing::recorder::Recording;
#[cfg(feature = "device")]
use sightsing::session::PracticeSession;
use sightsing::{ParsedScore, SightSingError};

#[cfg(feature = "device")]
const PUMP_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Parser, Debug)]
#[command(name = "sightsing")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Sight-singing practice: MusicXML timing, count-in playback and grading", long_about = None)]
struct Args {
    /// YAML practice configuration
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Tempo in quarter notes per minute (overrides the configuration)
    #[arg(short, long, global = true)]
    tempo: Option<f64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the timed notes of a MusicXML file as JSON
    Parse {
        #[arg(value_name = "SCORE")]
        file: PathBuf,
    },

    /// Generate an exercise and write it as MusicXML
    Generate {
        /// Tonic, e.g. C, F# or Bb
        #[arg(long, default_value = "C")]
        key: String,

        /// major or minor
        #[arg(long, default_value = "major", value_parser = parse_key_mode)]
        mode: KeyMode,

        /// Meter such as 4/4 or 6/8
        #[arg(long, default_value = "4/4", value_parser = parse_meter)]
        time: MeterSpec,

        #[arg(long, default_value_t = 4)]
        measures: u32,

        /// Lowest pitch, e.g. C4
        #[arg(long, default_value = "C4")]
        low: String,

        /// Highest pitch, e.g. C5
        #[arg(long, default_value = "C5")]
        high: String,

        /// quarters or mixed
        #[arg(long, default_value = "quarters", value_parser = parse_rhythm)]
        rhythm: RhythmStyle,

        #[arg(long, default_value_t = 1)]
        seed: u64,

        /// Write the exercise model as JSON instead of MusicXML
        #[arg(long)]
        json: bool,

        /// Output path; stdout when omitted
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Render the playback of a score to a WAV file
    Render {
        #[arg(value_name = "SCORE")]
        file: PathBuf,

        /// click-only, click-and-score or pitch-only
        #[arg(short, long, default_value = "click-and-score")]
        mode: PlaybackMode,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Mix a recorded take with the reference melody
    Mix {
        #[arg(value_name = "TAKE")]
        recording: PathBuf,

        #[arg(value_name = "SCORE")]
        score: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Grade a recorded take against a score
    Grade {
        #[arg(value_name = "TAKE")]
        recording: PathBuf,

        /// MusicXML, or an exercise written by `generate --json`
        #[arg(value_name = "SCORE")]
        score: PathBuf,

        /// Skip the evaluator and grade with the synthetic fallback
        #[arg(long)]
        offline: bool,
    },

    /// Play a score on the default output device
    #[cfg(feature = "device")]
    Play {
        #[arg(value_name = "SCORE")]
        file: PathBuf,

        /// click-only, click-and-score or pitch-only
        #[arg(short, long, default_value = "click-and-score")]
        mode: PlaybackMode,
    },

    /// Record a take from the default microphone, with the metronome
    #[cfg(feature = "device")]
    Record {
        #[arg(value_name = "SCORE")]
        score: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Take length; defaults to the count-in plus the melody plus a second
        #[arg(long)]
        seconds: Option<f64>,

        /// Grade the take once it is written
        #[arg(long)]
        grade: bool,
    },
}

fn parse_key_mode(s: &str) -> Result<KeyMode, String> {
    match s.to_ascii_lowercase().as_str() {
        "major" => Ok(KeyMode::Major),
        "minor" => Ok(KeyMode::Minor),
        other => Err(format!("unknown mode '{}' (expected major or minor)", other)),
    }
}

fn parse_rhythm(s: &str) -> Result<RhythmStyle, String> {
    match s.to_ascii_lowercase().as_str() {
        "quarters" => Ok(RhythmStyle::Quarters),
        "mixed" => Ok(RhythmStyle::Mixed),
        other => Err(format!("unknown rhythm '{}' (expected quarters or mixed)", other)),
    }
}

fn parse_meter(s: &str) -> Result<MeterSpec, String> {
    let (num, den) = s
        .split_once('/')
        .ok_or_else(|| format!("meter '{}' is not of the form N/D", s))?;
    let num = num.trim().parse().map_err(|_| format!("bad meter numerator in '{}'", s))?;
    let den = den.trim().parse().map_err(|_| format!("bad meter denominator in '{}'", s))?;
    Ok(MeterSpec { num, den })
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(args).await {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<(), SightSingError> {
    let mut config = match &args.config {
        Some(path) => PracticeConfig::load(path)?,
        None => PracticeConfig::default(),
    };
    if let Some(tempo) = args.tempo {
        config.tempo = tempo;
        config.validate()?;
    }

    match args.command {
        Commands::Parse { file } => {
            let score = load_score(&file, config.tempo)?;
            println!("{}", to_json(&score)?);
        }
        Commands::Generate {
            key,
            mode,
            time,
            measures,
            low,
            high,
            rhythm,
            seed,
            json,
            output,
        } => {
            let params = ExerciseParams {
                key: KeySpec::new(&key, mode),
                time,
                measures,
                range: RangeSpec { min: low, max: high },
                rhythm,
                ..ExerciseParams::default()
            };
            let exercise = generate_exercise(&params, seed)?;
            match (output, json) {
                (Some(path), false) => write_musicxml(&exercise, &path)?,
                (Some(path), true) => {
                    fs::write(&path, to_json(&exercise)?)?;
                    eprintln!("Wrote exercise to {}", path.display());
                }
                (None, false) => println!("{}", exercise_to_musicxml(&exercise)),
                (None, true) => println!("{}", to_json(&exercise)?),
            }
        }
        Commands::Render { file, mode, output } => {
            let score = load_score(&file, config.tempo)?;
            let samples = render_reference(&score, mode, &config.sounds, config.sample_rate)?;
            write_wav(&output, &samples, config.sample_rate)?;
            eprintln!(
                "Wrote {:.2}s of {} to {}",
                samples.len() as f64 / config.sample_rate as f64,
                mode,
                output.display()
            );
        }
        Commands::Mix {
            recording,
            score,
            output,
        } => {
            let take = load_recording(&recording)?;
            let score = load_score(&score, config.tempo)?;
            // A take that includes the count-in lines up with the clicked render
            let mode = if config.count_in {
                PlaybackMode::ClickAndScore
            } else {
                PlaybackMode::PitchOnly
            };
            let reference = render_reference(&score, mode, &config.sounds, take.sample_rate)?;
            write_mix(&take, &reference, take.sample_rate, MixLevels::default(), &output)?;
        }
        Commands::Grade {
            recording,
            score,
            offline,
        } => {
            let take = load_recording(&recording)?;
            let (exercise, xml) = load_exercise(&score, config.tempo)?;
            let pipeline = if offline {
                GradingPipeline::configured_offline(&config)
            } else {
                GradingPipeline::from_config(&config)
            };
            let results = pipeline
                .grade_against(&take, &exercise, &xml, config.tempo)
                .await;
            println!("{}", to_json(&results)?);
        }
        #[cfg(feature = "device")]
        Commands::Play { file, mode } => {
            let xml = fs::read_to_string(&file)?;
            let mut session = device_session(config)?;
            for warning in session.load_musicxml(&xml) {
                log::warn!("{}: {:?}", file.display(), warning);
            }
            let report = session.play(mode).await?;
            eprintln!(
                "Playing {} notes and {} clicks ({})",
                report.note_count, report.click_count, mode
            );
            while session.pump() {
                tokio::time::sleep(PUMP_INTERVAL).await;
            }
            session.close().await?;
        }
        #[cfg(feature = "device")]
        Commands::Record {
            score,
            output,
            seconds,
            grade,
        } => {
            let xml = fs::read_to_string(&score)?;
            let mut session = device_session(config)?;
            for warning in session.load_musicxml(&xml) {
                log::warn!("{}: {:?}", score.display(), warning);
            }
            let length = match (seconds, session.score()) {
                (Some(seconds), _) => seconds,
                (None, Some(parsed)) => parsed.intro_duration() + parsed.total_duration + 1.0,
                (None, None) => return Err(SightSingError::NoExercise),
            };

            session.start_recording().await?;
            eprintln!("Recording {:.1}s...", length);
            let started = Instant::now();
            while started.elapsed().as_secs_f64() < length {
                session.capture().await?;
                tokio::time::sleep(PUMP_INTERVAL).await;
            }
            let take = session.stop_recording().await?;
            write_wav(&output, &take.samples, take.sample_rate)?;
            eprintln!("Wrote {:.2}s take to {}", take.duration(), output.display());

            if grade {
                let results = session.grade().await?;
                println!("{}", to_json(results)?);
            }
            session.close().await?;
        }
    }
    Ok(())
}

#[cfg(feature = "device")]
fn device_session(
    config: PracticeConfig,
) -> Result<PracticeSession<DeviceContext, MicrophoneSource>, SightSingError> {
    PracticeSession::new(
        config,
        AudioContextSlot::new(DeviceContext::open),
        MicrophoneSource::new(),
    )
}

fn load_score(path: &Path, tempo: f64) -> Result<ParsedScore, SightSingError> {
    let xml = fs::read_to_string(path)?;
    let outcome = parse_with_warnings(&xml, tempo);
    for warning in &outcome.warnings {
        log::warn!("{}: {:?}", path.display(), warning);
    }
    Ok(outcome.score)
}

/// The exercise to grade against and the MusicXML sent with the take.
fn load_exercise(path: &Path, tempo: f64) -> Result<(ExerciseScore, String), SightSingError> {
    let content = fs::read_to_string(path)?;
    if path.extension().and_then(|e| e.to_str()) == Some("json") {
        let exercise: ExerciseScore = serde_json::from_str(&content)
            .map_err(|e| SightSingError::Encoding(format!("{}: {}", path.display(), e)))?;
        let xml = exercise_to_musicxml(&exercise);
        return Ok((exercise, xml));
    }
    let outcome = parse_with_warnings(&content, tempo);
    for warning in &outcome.warnings {
        log::warn!("{}: {:?}", path.display(), warning);
    }
    let exercise = ExerciseScore::from_parsed(&outcome.score);
    if outcome.used_fallback {
        let xml = exercise_to_musicxml(&exercise);
        return Ok((exercise, xml));
    }
    Ok((exercise, content))
}

fn load_recording(path: &Path) -> Result<Recording, SightSingError> {
    let (samples, sample_rate) = read_wav(path)?;
    Ok(Recording::new(samples, sample_rate))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String, SightSingError> {
    serde_json::to_string_pretty(value).map_err(|e| SightSingError::Encoding(e.to_string()))
}
