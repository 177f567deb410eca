use anyhow::Result;
use clap::Parser;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use tracing::info;
use voicegate::audio::{wav, AudioSource, DeviceDescriptor, DeviceSelection};
use voicegate::config::AppConfig;
use voicegate::pipeline::{PipelineResult, PipelineTimings, UtterancePipeline};
use voicegate::telemetry;
use voicegate::vad::Utterance;
use voicegate::Controller;

fn main() -> Result<()> {
    let mut config = AppConfig::parse();

    if config.list_input_devices {
        let devices = AudioSource::list_devices()?;
        print!("{}", render_device_list(&devices));
        return Ok(());
    }

    config.validate()?;
    telemetry::init_tracing(&config.log_level);

    let pipeline = WavSinkPipeline::new(config.dump_dir.clone(), config.normalize_dbfs);
    let mut controller = Controller::new(config.listener_config(), Box::new(pipeline));

    let selection = config
        .input_device
        .as_deref()
        .map(DeviceSelection::named);

    if !config.no_autostart {
        match controller.start(selection) {
            Ok(status) => info!(state = status.state.label(), "listener running"),
            Err(err) => eprintln!("failed to start listener: {err}"),
        }
    }

    run_control_repl(&mut controller)?;
    controller.shutdown()?;
    Ok(())
}

/// Minimal stdin control surface standing in for an external HTTP layer.
fn run_control_repl(controller: &mut Controller) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        write!(stdout, "voicegate> ")?;
        stdout.flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            return Ok(()); // EOF
        }
        let mut parts = line.trim().splitn(2, ' ');
        let command = parts.next().unwrap_or("");
        let argument = parts.next().map(str::trim).filter(|s| !s.is_empty());

        match (command, argument) {
            ("", _) => {}
            ("status", _) => {
                let snapshot = controller.status();
                println!("{}", serde_json::to_string_pretty(&*snapshot)?);
            }
            ("start", _) => match controller.start(None) {
                Ok(status) => println!("listener {}", status.state.label()),
                Err(err) => println!("error: {err}"),
            },
            ("stop", _) => match controller.stop() {
                Ok(status) => println!("listener {}", status.state.label()),
                Err(err) => println!("error: {err}"),
            },
            ("devices", _) => match controller.list_devices() {
                Ok(devices) => print!("{}", render_device_list(&devices)),
                Err(err) => println!("error: {err}"),
            },
            ("select", Some(name)) => match controller.select_device(name) {
                Ok(_) => println!("device set to '{name}'"),
                Err(err) => println!("error: {err}"),
            },
            ("select", None) => println!("usage: select <device name>"),
            ("quit", _) | ("shutdown", _) | ("exit", _) => return Ok(()),
            ("help", _) => {
                println!("commands: status | start | stop | devices | select <name> | quit");
            }
            (other, _) => println!("unknown command '{other}' (try 'help')"),
        }
    }
}

fn render_device_list(devices: &[DeviceDescriptor]) -> String {
    if devices.is_empty() {
        return "No audio input devices detected.\n".to_string();
    }
    let mut output = String::from("Available audio input devices:\n");
    for device in devices {
        output.push_str(&format!(
            "  - {} ({} Hz, {} ch)\n",
            device.name, device.default_sample_rate, device.channels
        ));
    }
    output
}

/// Demo pipeline: persists each utterance as a WAV file (when a dump dir is
/// configured) and reports timings. Transcription and replies belong to real
/// pipeline implementations outside this binary.
struct WavSinkPipeline {
    dump_dir: Option<PathBuf>,
    normalize_dbfs: Option<f32>,
    sequence: u64,
}

impl WavSinkPipeline {
    fn new(dump_dir: Option<PathBuf>, normalize_dbfs: Option<f32>) -> Self {
        Self {
            dump_dir,
            normalize_dbfs,
            sequence: 0,
        }
    }
}

impl UtterancePipeline for WavSinkPipeline {
    fn handle(&mut self, utterance: Utterance) -> Result<PipelineResult> {
        self.sequence += 1;
        let mut timings = PipelineTimings {
            utterance_ms: utterance.duration_ms(),
            ..PipelineTimings::default()
        };

        let audio_ref = match &self.dump_dir {
            Some(dir) => {
                let path = dir.join(format!("utterance-{:04}.wav", self.sequence));
                let write_start = std::time::Instant::now();
                wav::write_wav_int16_mono(
                    &path,
                    &utterance.samples,
                    utterance.sample_rate,
                    self.normalize_dbfs,
                )?;
                timings.synthesis_ms = write_start.elapsed().as_millis() as u64;
                info!(path = %path.display(), "utterance saved");
                Some(path)
            }
            None => None,
        };

        Ok(PipelineResult {
            transcript: String::new(),
            reply: String::new(),
            audio_ref,
            timings,
        })
    }
}
