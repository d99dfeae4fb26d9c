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
use std::{
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::store::{SampleStore, TimbreMode};

const DEFAULT_SAMPLE_RATE: u32 = 44100;
const DEFAULT_EXTENSION: &str = "wav";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("error parsing config: {0}")]
    Yaml(#[from] serde_yml::Error),
}

/// A YAML representation of the engine configuration.
#[derive(Deserialize, Clone)]
pub struct EngineConfig {
    /// Target sample rate in Hz (default: 44100).
    sample_rate: Option<u32>,

    /// The audio output device. None means the first cpal device.
    device: Option<String>,

    /// The MIDI input device for live playing.
    midi_device: Option<String>,

    /// The root directory holding one sample directory per timbre.
    samples: String,

    /// The timbres available to keyboards.
    timbres: Vec<TimbreConfig>,
}

/// A YAML representation of one timbre.
#[derive(Deserialize, Clone)]
pub struct TimbreConfig {
    /// The timbre name keyboards refer to.
    name: String,

    /// The sample directory under the repository root (default: the name).
    directory: Option<String>,

    /// The sample file extension (default: "wav").
    extension: Option<String>,

    /// Whether held notes loop a sustained region.
    #[serde(default)]
    mode: TimbreMode,
}

impl EngineConfig {
    /// Parses the engine configuration from a YAML file.
    pub fn from_file(path: &Path) -> Result<EngineConfig, ConfigError> {
        Ok(serde_yml::from_str(&fs::read_to_string(path)?)?)
    }

    /// Returns the target sample rate (default: 44100).
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE)
    }

    /// Returns the audio output device, if one is configured.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// Returns the MIDI input device, if one is configured.
    pub fn midi_device(&self) -> Option<&str> {
        self.midi_device.as_deref()
    }

    /// Returns the sample repository root.
    pub fn samples(&self) -> &Path {
        Path::new(&self.samples)
    }

    pub fn timbres(&self) -> &[TimbreConfig] {
        &self.timbres
    }

    /// Builds a sample store with every configured timbre registered.
    /// Samples are not loaded until a keyboard needs them.
    pub fn build_store(&self) -> SampleStore {
        let store = SampleStore::new(self.sample_rate());
        for timbre in &self.timbres {
            store.register_timbre(
                &timbre.name,
                timbre.directory(self.samples()),
                timbre.extension(),
                timbre.mode,
            );
        }
        store
    }
}

impl TimbreConfig {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The sample directory, resolved against the repository root.
    pub fn directory(&self, root: &Path) -> PathBuf {
        root.join(self.directory.as_deref().unwrap_or(&self.name))
    }

    pub fn extension(&self) -> &str {
        self.extension.as_deref().unwrap_or(DEFAULT_EXTENSION)
    }

    pub fn mode(&self) -> TimbreMode {
        self.mode
    }
}

#[cfg(test)]
mod test {
    use super::*;

    const CONFIG: &str = r#"
sample_rate: 48000
device: "USB Audio"
samples: /srv/samples
timbres:
  - name: piano
  - name: organ
    directory: pipe-organ
    extension: flac
    mode: sustain
"#;

    #[test]
    fn test_parse_full_config() {
        let config: EngineConfig = serde_yml::from_str(CONFIG).expect("parse");

        assert_eq!(config.sample_rate(), 48000);
        assert_eq!(config.device(), Some("USB Audio"));
        assert_eq!(config.midi_device(), None);
        assert_eq!(config.samples(), Path::new("/srv/samples"));

        let timbres = config.timbres();
        assert_eq!(timbres.len(), 2);
        assert_eq!(timbres[0].name(), "piano");
        assert_eq!(
            timbres[0].directory(config.samples()),
            PathBuf::from("/srv/samples/piano")
        );
        assert_eq!(timbres[0].extension(), "wav");
        assert_eq!(timbres[0].mode(), TimbreMode::Simple);

        assert_eq!(
            timbres[1].directory(config.samples()),
            PathBuf::from("/srv/samples/pipe-organ")
        );
        assert_eq!(timbres[1].extension(), "flac");
        assert_eq!(timbres[1].mode(), TimbreMode::Sustain);
    }

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_yml::from_str(
            r#"
samples: samples
timbres:
  - name: piano
"#,
        )
        .expect("parse");

        assert_eq!(config.sample_rate(), 44100);
        assert_eq!(config.device(), None);
    }

    #[test]
    fn test_build_store_registers_timbres() {
        let config: EngineConfig = serde_yml::from_str(CONFIG).expect("parse");
        let store = config.build_store();

        let mut names = store.timbre_names();
        names.sort();
        assert_eq!(names, vec!["organ", "piano"]);
        assert_eq!(store.mode("organ"), Ok(TimbreMode::Sustain));
        assert!(!store.is_loaded("piano"));
    }

    #[test]
    fn test_from_file_missing() {
        let result = EngineConfig::from_file(Path::new("/nonexistent/config.yaml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engine.yaml");
        fs::write(&path, CONFIG).expect("write");

        let config = EngineConfig::from_file(&path).expect("config");
        assert_eq!(config.timbres().len(), 2);
    }
}
