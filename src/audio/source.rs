//! Audio sources the streamer can read from
//!
//! Files are decoded by [`SymphoniaOpener`](crate::audio::decoder::SymphoniaOpener)
//! behind the [`SourceOpener`] boundary. A generated tone stands in when
//! there is nothing to play.

use std::f64::consts::TAU;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::AudioError;

/// Format reported by a source
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bit_depth: u16,
}

/// Stereo samples in `[-1.0, 1.0]`, read block by block
pub trait SampleSource: Send {
    fn format(&self) -> AudioFormat;

    /// Fill `out` from the front. Returns the number of frames written;
    /// zero means the source is exhausted.
    fn read(&mut self, out: &mut [[f64; 2]]) -> Result<usize, AudioError>;
}

/// Turns a playlist entry into a readable source
pub trait SourceOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SampleSource>, AudioError>;
}

/// Sine wave on both channels
pub struct ToneSource {
    frequency: f64,
    sample_rate: u32,
    amplitude: f64,
    position: u64,
    remaining: Option<u64>,
}

impl ToneSource {
    /// Endless tone at `frequency` Hz
    pub fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            frequency,
            sample_rate: sample_rate.max(1),
            amplitude: 0.25,
            position: 0,
            remaining: None,
        }
    }

    /// Stop after `frames` frames
    pub fn with_duration(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }
}

impl SampleSource for ToneSource {
    fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.sample_rate,
            channels: 2,
            bit_depth: 64,
        }
    }

    fn read(&mut self, out: &mut [[f64; 2]]) -> Result<usize, AudioError> {
        let len = match self.remaining {
            Some(remaining) => out.len().min(remaining as usize),
            None => out.len(),
        };

        let step = TAU * self.frequency / self.sample_rate as f64;
        for frame in &mut out[..len] {
            let value = self.amplitude * (step * self.position as f64).sin();
            *frame = [value, value];
            self.position += 1;
        }

        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= len as u64;
        }
        Ok(len)
    }
}

/// Files in a directory, played in name order
#[derive(Debug, Clone, Default)]
pub struct Playlist {
    entries: Vec<PathBuf>,
}

impl Playlist {
    /// List the regular files directly inside `dir`
    pub fn scan(dir: &Path) -> Result<Self, AudioError> {
        let read_dir = fs::read_dir(dir).map_err(|e| {
            AudioError::SourceFailed(format!("cannot read {}: {}", dir.display(), e))
        })?;

        let mut entries: Vec<PathBuf> = read_dir
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .map(|entry| entry.path())
            .collect();
        entries.sort();

        Ok(Self { entries })
    }

    pub fn from_entries(entries: Vec<PathBuf>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[PathBuf] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tone_is_bounded_and_stereo() {
        let mut tone = ToneSource::new(440.0, 44100);
        let mut out = [[0.0; 2]; 256];

        assert_eq!(tone.read(&mut out).unwrap(), 256);
        assert!(out.iter().all(|f| f[0] == f[1] && f[0].abs() <= 1.0));
        assert!(out.iter().any(|f| f[0] != 0.0));
    }

    #[test]
    fn test_tone_duration() {
        let mut tone = ToneSource::new(440.0, 1000).with_duration(300);
        let mut out = [[0.0; 2]; 256];

        assert_eq!(tone.read(&mut out).unwrap(), 256);
        assert_eq!(tone.read(&mut out).unwrap(), 44);
        assert_eq!(tone.read(&mut out).unwrap(), 0);
    }

    #[test]
    fn test_playlist_lists_files_in_order() {
        let dir = std::env::temp_dir().join(format!("playlist-test-{}", uuid::Uuid::new_v4()));
        fs::create_dir_all(dir.join("nested")).unwrap();
        fs::write(dir.join("b.wav"), b"").unwrap();
        fs::write(dir.join("a.wav"), b"").unwrap();

        let playlist = Playlist::scan(&dir).unwrap();
        let names: Vec<_> = playlist
            .entries()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.wav", "b.wav"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_missing_playlist_dir() {
        let missing = std::env::temp_dir().join(format!("missing-{}", uuid::Uuid::new_v4()));
        assert!(matches!(
            Playlist::scan(&missing),
            Err(AudioError::SourceFailed(_))
        ));
    }
}
