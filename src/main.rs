// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::{crate_version, Parser, Subcommand};
use midly::Smf;

use clavier::audio;
use clavier::config::EngineConfig;
use clavier::graph::Mixer;
use clavier::midi;
use clavier::notes;
use clavier::playsync::CancelHandle;
use clavier::store::SampleStore;
use clavier::timeline::{Timeline, TimelineScheduler};
use clavier::timer::TimerQueue;
use clavier::voices::{KeyboardSettings, VoiceEngine};

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A virtual multi-instrument keyboard."
)]
struct Cli {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists and verifies the timbres in the given engine config.
    Timbres {
        /// The path to the engine config.
        config_path: String,
    },
    /// Lists the available audio output devices.
    Devices {},
    /// Lists the available MIDI input devices.
    MidiDevices {},
    /// Plays a MIDI file through a keyboard.
    Play {
        /// The path to the engine config.
        config_path: String,
        /// The timbre to play with.
        timbre: String,
        /// The MIDI file to play.
        midi_file: String,
        /// The keyboard volume, 0.0 to 2.0.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
        /// Sustain held notes with looped playback.
        #[arg(short, long)]
        sustain: bool,
    },
    /// Routes a MIDI input device to a live keyboard.
    Live {
        /// The path to the engine config.
        config_path: String,
        /// The timbre to play with.
        timbre: String,
        /// The keyboard volume, 0.0 to 2.0.
        #[arg(short, long, default_value_t = 1.0)]
        volume: f32,
        /// Sustain held notes with looped playback.
        #[arg(short, long)]
        sustain: bool,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Timbres { config_path } => {
            let config = EngineConfig::from_file(&PathBuf::from(config_path))?;
            let store = Arc::new(config.build_store());

            println!("Timbres (count: {}):", config.timbres().len());
            for name in store.timbre_names() {
                store.ensure_loaded(&name)?;
                let loaded = notes::note_range()
                    .filter(|note| store.buffer(&name, *note).is_some())
                    .count();
                println!("- {} ({:?}, {} of 88 notes)", name, store.mode(&name)?, loaded);
            }
        }
        Commands::Devices {} => {
            let devices = audio::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::MidiDevices {} => {
            let devices = midi::list_devices()?;

            if devices.is_empty() {
                println!("No devices found.");
                return Ok(());
            }

            println!("Devices:");
            for device in devices {
                println!("- {}", device);
            }
        }
        Commands::Play {
            config_path,
            timbre,
            midi_file,
            volume,
            sustain,
        } => {
            let config = EngineConfig::from_file(&PathBuf::from(config_path))?;
            let (engine, cancel_handle) = start_engine(&config, &timbre, volume, sustain)?;

            let smf_bytes = fs::read(Path::new(&midi_file))?;
            let smf = Smf::parse(&smf_bytes)?;
            let timeline = Timeline::from_midi(&smf);
            let duration = timeline.duration();

            let scheduler = TimelineScheduler::new(engine, Arc::new(TimerQueue::new()));
            scheduler.set_keyboard(KEYBOARD);
            scheduler.load(timeline);
            scheduler.play()?;

            // Leave room for the final release fades.
            thread::sleep(Duration::from_secs_f64(duration + 1.0));
            scheduler.stop();
            cancel_handle.cancel();
        }
        Commands::Live {
            config_path,
            timbre,
            volume,
            sustain,
        } => {
            let config = EngineConfig::from_file(&PathBuf::from(config_path))?;
            let midi_device_name = config
                .midi_device()
                .ok_or("there must be a MIDI device specified")?
                .to_string();
            let (engine, cancel_handle) = start_engine(&config, &timbre, volume, sustain)?;

            let midi_device = midi::get_device(&midi_device_name)?;
            let (sender, receiver) = crossbeam_channel::unbounded();
            midi_device.watch_events(sender)?;

            // Runs until the input device goes away.
            for event in receiver {
                midi::route_event(&event, &engine, KEYBOARD);
            }

            midi_device.stop_watch_events();
            cancel_handle.cancel();
        }
    }

    Ok(())
}

/// The single keyboard the CLI drives.
const KEYBOARD: &str = "main";

/// Builds the store, mixer, and voice engine from the config, loads the
/// requested timbre, and starts the output device on its own thread.
fn start_engine(
    config: &EngineConfig,
    timbre: &str,
    volume: f32,
    sustain: bool,
) -> Result<(Arc<VoiceEngine>, CancelHandle), Box<dyn Error>> {
    let device_name = config
        .device()
        .ok_or("there must be an audio device specified")?;
    let device = audio::get_device(device_name, config.sample_rate())?;

    let store = Arc::new(config.build_store());
    store.ensure_loaded(timbre)?;

    let (mixer, source_tx) = Mixer::new(config.sample_rate());
    let engine = Arc::new(VoiceEngine::new(
        store,
        mixer.clone(),
        source_tx,
        audio::BUFFER_SIZE,
    ));
    engine.add_keyboard(
        KEYBOARD,
        KeyboardSettings {
            timbre: timbre.to_string(),
            volume,
            sustain,
        },
    );

    let cancel_handle = CancelHandle::new();
    {
        let cancel_handle = cancel_handle.clone();
        thread::spawn(move || {
            if let Err(e) = device.run(mixer, cancel_handle) {
                tracing::error!(err = e.as_ref(), "Audio device stopped with error.");
            }
        });
    }

    Ok((engine, cancel_handle))
}
