use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use ambient_effects_core::{
    AmbientPipeline, AppSettings, DeviceAudioCapture, EffectRegistry, EngineConfig,
    GradientGrabber, MonitorSource, SineDevice, StaticMonitorSource, TimedScreenCapture,
};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() -> ambient_effects_core::Result<()> {
    init_tracing();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            duration,
            effect,
            sensitivity,
            monitors,
            settings,
            secondaries,
        } => {
            let mut loaded = match settings.as_deref() {
                Some(path) => load_settings(path)?,
                None => AppSettings::default(),
            };
            if let Some(effect) = effect {
                loaded.selected_effect_id = effect;
            }
            if let Some(sensitivity) = sensitivity {
                loaded.audio_sensitivity = sensitivity;
            }
            if !monitors.is_empty() {
                loaded.target_monitor_ids = monitors;
            }
            loaded.enabled = true;
            run(loaded, Duration::from_secs(duration), secondaries)
        }
        Commands::Effects { json } => list_effects(json),
    }
}

fn load_settings(path: &Path) -> ambient_effects_core::Result<AppSettings> {
    tracing::info!(?path, "loading settings");
    let text = std::fs::read_to_string(path)?;
    AppSettings::from_json(&text)
}

fn run(settings: AppSettings, duration: Duration, secondaries: usize) -> ambient_effects_core::Result<()> {
    let config = EngineConfig::default();
    let monitors = Arc::new(StaticMonitorSource::with_secondaries(secondaries));
    for monitor in monitors.connected_monitors()? {
        tracing::info!(id = %monitor.id, name = %monitor.name, primary = monitor.is_primary, "monitor");
    }

    let pipeline = AmbientPipeline::new(
        &config,
        Arc::new(RwLock::new(EffectRegistry::with_builtins())),
        monitors,
        Arc::new(TimedScreenCapture::new(
            GradientGrabber::new(320, 180),
            config.capture_interval(),
        )),
        Arc::new(DeviceAudioCapture::new(SineDevice::new(48_000, 440.0))),
    )?;
    pipeline
        .runtime()
        .status()
        .subscribe(|message| tracing::info!(status = %message));

    tracing::info!(
        effect = %settings.selected_effect_id,
        sensitivity = settings.audio_sensitivity,
        ?duration,
        "starting ambient effects"
    );
    if let Err(err) = pipeline.apply_settings(&settings) {
        pipeline.shutdown();
        return Err(err);
    }

    std::thread::sleep(duration);

    let (color, intensity) = pipeline.processor().last_values();
    tracing::info!(
        ?color,
        intensity,
        dropped = pipeline.processor().dropped_samples(),
        capture_errors = pipeline.processor().capture_errors(),
        "final signal"
    );
    pipeline.shutdown();
    Ok(())
}

fn list_effects(json: bool) -> ambient_effects_core::Result<()> {
    let descriptors = EffectRegistry::with_builtins().descriptors();
    if json {
        println!("{}", serde_json::to_string_pretty(&descriptors)?);
        return Ok(());
    }
    for descriptor in descriptors {
        println!(
            "{:<22} {:<24} {}",
            descriptor.id, descriptor.display_name, descriptor.description
        );
    }
    Ok(())
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .try_init();
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Ambient screen and audio reactive effects", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Capture, fuse and render effects for a fixed amount of time.
    Run {
        /// Seconds to keep the effects running.
        #[arg(short, long, default_value_t = 10)]
        duration: u64,
        /// Effect id to render, e.g. `softglow`.
        #[arg(short, long)]
        effect: Option<String>,
        /// Audio sensitivity in `[0, 1]`.
        #[arg(short, long)]
        sensitivity: Option<f32>,
        /// Target monitor ids. Defaults to every secondary monitor.
        #[arg(short, long)]
        monitors: Vec<String>,
        /// JSON settings document; flags override its values.
        #[arg(long)]
        settings: Option<PathBuf>,
        /// Number of simulated secondary monitors.
        #[arg(long, default_value_t = 2)]
        secondaries: usize,
    },
    /// List the registered effects.
    Effects {
        /// Print the descriptors as JSON.
        #[arg(long)]
        json: bool,
    },
}
