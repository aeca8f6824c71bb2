//! File decoding through Symphonia
//!
//! Any format Symphonia is built with (WAV and MP3 here) is decoded to
//! stereo and resampled to the mesh rate, so every playlist entry streams
//! at the same rate whatever it was recorded at.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, info, warn};

use crate::audio::resample::Resampler;
use crate::audio::source::{AudioFormat, SampleSource, SourceOpener};
use crate::error::AudioError;

/// Opens playlist entries with Symphonia, resampling to `target_rate`
#[derive(Debug, Clone, Copy)]
pub struct SymphoniaOpener {
    target_rate: u32,
}

impl SymphoniaOpener {
    pub fn new(target_rate: u32) -> Self {
        Self { target_rate }
    }
}

impl SourceOpener for SymphoniaOpener {
    fn open(&self, path: &Path) -> Result<Box<dyn SampleSource>, AudioError> {
        Ok(Box::new(FileSource::open(path, self.target_rate)?))
    }
}

/// One decoded audio file
pub struct FileSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    resampler: Resampler,
    target_rate: u32,
    bit_depth: u16,
    exhausted: bool,
}

impl FileSource {
    pub fn open(path: &Path, target_rate: u32) -> Result<Self, AudioError> {
        let file = File::open(path)
            .map_err(|e| AudioError::SourceFailed(format!("{}: {}", path.display(), e)))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let detected = symphonia::default::get_probe()
            .format(
                &hint,
                stream,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;
        let reader = detected.format;

        let track = reader
            .tracks()
            .iter()
            .find(|track| track.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| {
                AudioError::UnsupportedFormat(format!("{}: no audio track", path.display()))
            })?;
        let params = &track.codec_params;
        let track_id = track.id;

        let source_rate = params.sample_rate.ok_or_else(|| {
            AudioError::UnsupportedFormat(format!("{}: unknown sample rate", path.display()))
        })?;
        let channels = params.channels.map(|c| c.count()).unwrap_or(0);
        let bit_depth = params.bits_per_sample.unwrap_or(0) as u16;

        let decoder = symphonia::default::get_codecs()
            .make(params, &DecoderOptions::default())
            .map_err(|e| AudioError::UnsupportedFormat(format!("{}: {}", path.display(), e)))?;

        info!(
            "Decoding {}: {} channels at {} Hz, {} bit",
            path.display(),
            channels,
            source_rate,
            bit_depth
        );
        if source_rate != target_rate {
            debug!("Resampling {} Hz to {} Hz", source_rate, target_rate);
        }

        Ok(Self {
            reader,
            decoder,
            track_id,
            resampler: Resampler::new(source_rate, target_rate),
            target_rate,
            bit_depth,
            exhausted: false,
        })
    }

    /// Decode the next packet of our track into the resampler
    fn decode_next(&mut self) -> Result<(), AudioError> {
        let packet = match self.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                self.exhausted = true;
                return Ok(());
            }
            Err(SymphoniaError::ResetRequired) => {
                self.exhausted = true;
                return Ok(());
            }
            Err(e) => return Err(AudioError::SourceFailed(e.to_string())),
        };
        if packet.track_id() != self.track_id {
            return Ok(());
        }

        let decoded = match self.decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("Skipping corrupt packet: {}", e);
                return Ok(());
            }
            Err(e) => return Err(AudioError::SourceFailed(e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        if channels == 0 {
            return Ok(());
        }
        let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        samples.copy_interleaved_ref(decoded);

        self.resampler
            .push(samples.samples().chunks_exact(channels).map(|frame| match frame {
                [mono] => [*mono as f64, *mono as f64],
                [left, right, ..] => [*left as f64, *right as f64],
                [] => [0.0, 0.0],
            }));
        Ok(())
    }
}

impl SampleSource for FileSource {
    fn format(&self) -> AudioFormat {
        AudioFormat {
            sample_rate: self.target_rate,
            channels: 2,
            bit_depth: self.bit_depth,
        }
    }

    fn read(&mut self, out: &mut [[f64; 2]]) -> Result<usize, AudioError> {
        let mut written = 0;
        while written < out.len() {
            if let Some(frame) = self.resampler.next_frame(self.exhausted) {
                out[written] = frame;
                written += 1;
                continue;
            }
            if self.exhausted {
                break;
            }
            self.decode_next()?;
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    /// 16-bit PCM WAV with every frame set to `frame`
    fn write_wav(path: &Path, rate: u32, channels: u16, frames: usize, frame: &[i16]) {
        let block_align = channels * 2;
        let data_len = (frames * block_align as usize) as u32;

        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"RIFF");
        bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
        bytes.extend_from_slice(b"WAVEfmt ");
        bytes.extend_from_slice(&16u32.to_le_bytes());
        bytes.extend_from_slice(&1u16.to_le_bytes());
        bytes.extend_from_slice(&channels.to_le_bytes());
        bytes.extend_from_slice(&rate.to_le_bytes());
        bytes.extend_from_slice(&(rate * block_align as u32).to_le_bytes());
        bytes.extend_from_slice(&block_align.to_le_bytes());
        bytes.extend_from_slice(&16u16.to_le_bytes());
        bytes.extend_from_slice(b"data");
        bytes.extend_from_slice(&data_len.to_le_bytes());
        for _ in 0..frames {
            for sample in frame {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }
        }
        std::fs::write(path, bytes).unwrap();
    }

    fn temp_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("{}-{}", uuid::Uuid::new_v4(), name))
    }

    fn read_all(source: &mut dyn SampleSource) -> Vec<[f64; 2]> {
        let mut all = Vec::new();
        let mut block = [[0.0; 2]; 512];
        loop {
            let read = source.read(&mut block).unwrap();
            if read == 0 {
                return all;
            }
            all.extend_from_slice(&block[..read]);
        }
    }

    #[test]
    fn test_wav_at_mesh_rate() {
        let path = temp_file("stereo.wav");
        write_wav(&path, 44100, 2, 1000, &[16384, -16384]);

        let mut source = SymphoniaOpener::new(44100).open(&path).unwrap();
        assert_eq!(source.format().sample_rate, 44100);
        let frames = read_all(source.as_mut());

        assert_eq!(frames.len(), 1000);
        assert!(frames.iter().all(|f| (f[0] - 0.5).abs() < 1e-3 && (f[1] + 0.5).abs() < 1e-3));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_mono_wav_upsampled_to_stereo() {
        let path = temp_file("mono.wav");
        write_wav(&path, 22050, 1, 500, &[8192]);

        let mut source = SymphoniaOpener::new(44100).open(&path).unwrap();
        assert_eq!(source.format().sample_rate, 44100);
        let frames = read_all(source.as_mut());

        assert!((999..=1000).contains(&frames.len()), "got {} frames", frames.len());
        assert!(frames.iter().all(|f| (f[0] - 0.25).abs() < 1e-3 && f[0] == f[1]));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_garbage_is_unsupported() {
        let path = temp_file("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(matches!(
            SymphoniaOpener::new(44100).open(&path),
            Err(AudioError::UnsupportedFormat(_))
        ));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_fails() {
        assert!(matches!(
            SymphoniaOpener::new(44100).open(&temp_file("missing.wav")),
            Err(AudioError::SourceFailed(_))
        ));
    }
}
