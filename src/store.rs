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

//! The sample store.
//!
//! Each timbre is a directory of per-note sample files named after the note
//! (`piano_A0.wav` through `piano_C8.wav`). Timbres are registered cheaply up
//! front and decoded on first use; concurrent callers of [`SampleStore::ensure_loaded`]
//! wait for the in-flight load instead of decoding twice. Missing or broken
//! files are logged and skipped, so a partial sample set still plays.

pub mod decode;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::graph::SampleBuffer;
use crate::notes;

/// How a timbre's voices are shaped after the attack.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimbreMode {
    /// Play the sample once and let it ring out.
    #[default]
    Simple,
    /// Crossfade into a looped region so the note sustains indefinitely.
    Sustain,
}

/// Errors interacting with the store.
#[derive(Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("unknown timbre {0}")]
    UnknownTimbre(String),
}

enum LoadState {
    Registered,
    Loading,
    Loaded(Arc<TimbreSamples>),
}

/// The decoded buffers of one timbre, keyed by MIDI note number.
pub struct TimbreSamples {
    buffers: HashMap<u8, Arc<SampleBuffer>>,
}

struct TimbreEntry {
    directory: PathBuf,
    extension: String,
    mode: TimbreMode,
    state: LoadState,
}

/// A lazy cache of decoded per-note sample buffers.
pub struct SampleStore {
    sample_rate: u32,
    timbres: Mutex<HashMap<String, TimbreEntry>>,
    condvar: Condvar,
}

impl SampleStore {
    /// Creates a store that decodes everything to the given engine rate.
    pub fn new(sample_rate: u32) -> SampleStore {
        SampleStore {
            sample_rate,
            timbres: Mutex::new(HashMap::new()),
            condvar: Condvar::new(),
        }
    }

    /// Registers a timbre without loading anything.
    pub fn register_timbre(
        &self,
        name: &str,
        directory: PathBuf,
        extension: &str,
        mode: TimbreMode,
    ) {
        let mut timbres = self.timbres.lock().expect("Error getting lock");
        timbres.insert(
            name.to_string(),
            TimbreEntry {
                directory,
                extension: extension.to_string(),
                mode,
                state: LoadState::Registered,
            },
        );
    }

    /// The registered timbre names.
    pub fn timbre_names(&self) -> Vec<String> {
        let timbres = self.timbres.lock().expect("Error getting lock");
        let mut names: Vec<String> = timbres.keys().cloned().collect();
        names.sort();
        names
    }

    /// The mode of a registered timbre.
    pub fn mode(&self, timbre: &str) -> Result<TimbreMode, StoreError> {
        let timbres = self.timbres.lock().expect("Error getting lock");
        timbres
            .get(timbre)
            .map(|entry| entry.mode)
            .ok_or_else(|| StoreError::UnknownTimbre(timbre.to_string()))
    }

    /// Returns true if the timbre's samples are decoded and ready.
    pub fn is_loaded(&self, timbre: &str) -> bool {
        let timbres = self.timbres.lock().expect("Error getting lock");
        matches!(
            timbres.get(timbre).map(|entry| &entry.state),
            Some(LoadState::Loaded(_))
        )
    }

    /// Decodes the timbre's samples if they aren't decoded yet. Blocks until
    /// the samples are ready; when a load is already in flight on another
    /// thread, waits for that load instead of starting a second one.
    pub fn ensure_loaded(&self, timbre: &str) -> Result<(), StoreError> {
        let (directory, extension) = {
            let mut timbres = self.timbres.lock().expect("Error getting lock");
            loop {
                let entry = timbres
                    .get_mut(timbre)
                    .ok_or_else(|| StoreError::UnknownTimbre(timbre.to_string()))?;
                match entry.state {
                    LoadState::Loaded(_) => return Ok(()),
                    LoadState::Loading => {
                        timbres = self.condvar.wait(timbres).expect("Error getting lock");
                    }
                    LoadState::Registered => {
                        entry.state = LoadState::Loading;
                        break (entry.directory.clone(), entry.extension.clone());
                    }
                }
            }
        };

        let samples = Self::load_directory(timbre, &directory, &extension, self.sample_rate);

        let mut timbres = self.timbres.lock().expect("Error getting lock");
        if let Some(entry) = timbres.get_mut(timbre) {
            entry.state = LoadState::Loaded(Arc::new(samples));
        }
        self.condvar.notify_all();
        Ok(())
    }

    /// The decoded buffer for a note, or None if the timbre is unknown, not
    /// loaded yet, or has no sample for the note.
    pub fn buffer(&self, timbre: &str, note: u8) -> Option<Arc<SampleBuffer>> {
        let timbres = self.timbres.lock().expect("Error getting lock");
        match timbres.get(timbre).map(|entry| &entry.state) {
            Some(LoadState::Loaded(samples)) => samples.buffers.get(&note).cloned(),
            _ => None,
        }
    }

    fn load_directory(
        timbre: &str,
        directory: &Path,
        extension: &str,
        sample_rate: u32,
    ) -> TimbreSamples {
        let start = Instant::now();
        let mut buffers = HashMap::new();
        let mut missing = 0u32;

        for note in notes::note_range() {
            let name = notes::note_name(note).expect("in-range note");
            let path = directory.join(format!("piano_{}.{}", name, extension));
            if !path.exists() {
                missing += 1;
                continue;
            }
            match decode::decode_file(&path, sample_rate) {
                Ok(buffer) => {
                    buffers.insert(note, Arc::new(buffer));
                }
                Err(e) => {
                    warn!(
                        timbre = timbre,
                        path = ?path,
                        error = %e,
                        "Failed to decode sample, skipping note."
                    );
                    missing += 1;
                }
            }
        }

        info!(
            timbre = timbre,
            loaded = buffers.len(),
            missing = missing,
            elapsed_ms = start.elapsed().as_millis(),
            "Timbre loaded."
        );
        TimbreSamples { buffers }
    }

    /// Installs an already-decoded timbre, bypassing the filesystem.
    #[cfg(test)]
    pub fn insert_timbre_for_test(
        &self,
        name: &str,
        mode: TimbreMode,
        buffers: HashMap<u8, Arc<SampleBuffer>>,
    ) {
        let mut timbres = self.timbres.lock().expect("Error getting lock");
        timbres.insert(
            name.to_string(),
            TimbreEntry {
                directory: PathBuf::new(),
                extension: String::new(),
                mode,
                state: LoadState::Loaded(Arc::new(TimbreSamples { buffers })),
            },
        );
    }
}

#[cfg(test)]
mod test {
    use std::thread;

    use super::*;

    fn write_wav(path: &Path, frames: usize) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).expect("wav writer");
        for i in 0..frames {
            let sample = ((i as f32 * 0.1).sin() * 8192.0) as i16;
            writer.write_sample(sample).expect("write sample");
        }
        writer.finalize().expect("finalize");
    }

    #[test]
    fn test_load_with_gaps() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_wav(&dir.path().join("piano_C4.wav"), 100);
        write_wav(&dir.path().join("piano_Csharp4.wav"), 100);

        let store = SampleStore::new(44100);
        store.register_timbre("piano", dir.path().to_path_buf(), "wav", TimbreMode::Simple);
        assert!(!store.is_loaded("piano"));

        store.ensure_loaded("piano").expect("load");
        assert!(store.is_loaded("piano"));
        assert!(store.buffer("piano", 60).is_some());
        assert!(store.buffer("piano", 61).is_some());
        // No file for D4; missing notes are simply absent.
        assert!(store.buffer("piano", 62).is_none());
    }

    #[test]
    fn test_ensure_loaded_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_wav(&dir.path().join("piano_A0.wav"), 50);

        let store = SampleStore::new(44100);
        store.register_timbre("piano", dir.path().to_path_buf(), "wav", TimbreMode::Simple);
        store.ensure_loaded("piano").expect("load");
        store.ensure_loaded("piano").expect("second load");
        assert!(store.buffer("piano", 21).is_some());
    }

    #[test]
    fn test_unknown_timbre() {
        let store = SampleStore::new(44100);
        assert_eq!(
            store.ensure_loaded("nope"),
            Err(StoreError::UnknownTimbre("nope".to_string()))
        );
        assert_eq!(
            store.mode("nope"),
            Err(StoreError::UnknownTimbre("nope".to_string()))
        );
        assert!(store.buffer("nope", 60).is_none());
    }

    #[test]
    fn test_concurrent_loads() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_wav(&dir.path().join("piano_C4.wav"), 1000);

        let store = Arc::new(SampleStore::new(44100));
        store.register_timbre("piano", dir.path().to_path_buf(), "wav", TimbreMode::Simple);

        let mut joins = Vec::new();
        for _ in 0..4 {
            let store = store.clone();
            joins.push(thread::spawn(move || store.ensure_loaded("piano")));
        }
        for join in joins {
            assert!(join.join().expect("thread").is_ok());
        }
        assert!(store.buffer("piano", 60).is_some());
    }

    #[test]
    fn test_resamples_to_engine_rate() {
        let dir = tempfile::tempdir().expect("tempdir");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 22050,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let path = dir.path().join("piano_C4.wav");
        let mut writer = hound::WavWriter::create(&path, spec).expect("wav writer");
        for _ in 0..2205 {
            writer.write_sample(1000i16).expect("write sample");
        }
        writer.finalize().expect("finalize");

        let store = SampleStore::new(44100);
        store.register_timbre("piano", dir.path().to_path_buf(), "wav", TimbreMode::Sustain);
        store.ensure_loaded("piano").expect("load");

        let buffer = store.buffer("piano", 60).expect("buffer");
        assert_eq!(buffer.sample_rate, 44100);
        assert!(buffer.data.len() >= 4410);
        assert_eq!(store.mode("piano"), Ok(TimbreMode::Sustain));
    }
}
