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
use std::fs::File;
use std::path::Path;

use symphonia::core::audio::{AudioBuffer, AudioBufferRef, Signal};
use symphonia::core::codecs::CODEC_TYPE_NULL;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::probe::Hint;
use symphonia::default::{get_codecs, get_probe};
use thiserror::Error;

use crate::graph::SampleBuffer;

/// Errors decoding a sample file.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unable to open sample file: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to decode sample file: {0}")]
    Audio(#[from] SymphoniaError),
    #[error("unsupported sample file: {0}")]
    Unsupported(String),
}

/// Decodes an audio file into a mono buffer at the engine sample rate.
/// Multi-channel sources are downmixed by averaging.
pub fn decode_file(path: &Path, target_rate: u32) -> Result<SampleBuffer, DecodeError> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = path.extension().and_then(|ext| ext.to_str()) {
        hint.with_extension(extension);
    }

    let probed = get_probe().format(&hint, mss, &Default::default(), &Default::default())?;
    let mut format_reader = probed.format;

    let track = format_reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| DecodeError::Unsupported("no audio track found".to_string()))?;
    let track_id = track.id;
    let params = &track.codec_params;
    let source_rate = params
        .sample_rate
        .ok_or_else(|| DecodeError::Unsupported("sample rate not specified".to_string()))?;

    let mut decoder = get_codecs().make(params, &Default::default())?;

    let mut mono = Vec::new();
    loop {
        let packet = match format_reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                continue;
            }
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            // Some decoders report EOF as a decode error.
            Err(SymphoniaError::DecodeError(_)) => break,
            Err(e) => return Err(e.into()),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::ResetRequired) => {
                decoder.reset();
                decoder.decode(&packet)?
            }
            Err(e) => return Err(e.into()),
        };
        downmix_to_f32(decoded, &mut mono);
    }

    let data = if source_rate != target_rate {
        resample(&mono, source_rate, target_rate)
    } else {
        mono
    };

    Ok(SampleBuffer {
        data,
        sample_rate: target_rate,
    })
}

/// Downmixes a decoded buffer of any sample format into mono f32.
fn downmix_to_f32(decoded: AudioBufferRef, out: &mut Vec<f32>) {
    match decoded {
        AudioBufferRef::F32(buf) => downmix(&buf, |sample| sample, out),
        AudioBufferRef::F64(buf) => downmix(&buf, |sample| sample as f32, out),
        AudioBufferRef::S8(buf) => downmix(&buf, |sample| sample as f32 / (1i64 << 7) as f32, out),
        AudioBufferRef::S16(buf) => {
            downmix(&buf, |sample| sample as f32 / (1i64 << 15) as f32, out)
        }
        AudioBufferRef::S24(buf) => downmix(
            &buf,
            |sample| sample.inner() as f32 / (1i64 << 23) as f32,
            out,
        ),
        AudioBufferRef::S32(buf) => {
            downmix(&buf, |sample| sample as f32 / (1i64 << 31) as f32, out)
        }
        AudioBufferRef::U8(buf) => downmix(
            &buf,
            |sample| (sample as f32 / u8::MAX as f32) * 2.0 - 1.0,
            out,
        ),
        AudioBufferRef::U16(buf) => downmix(
            &buf,
            |sample| (sample as f32 / u16::MAX as f32) * 2.0 - 1.0,
            out,
        ),
        AudioBufferRef::U24(buf) => downmix(
            &buf,
            |sample| (sample.inner() as f32 / ((1u32 << 24) - 1) as f32) * 2.0 - 1.0,
            out,
        ),
        AudioBufferRef::U32(buf) => downmix(
            &buf,
            |sample| (sample as f32 / u32::MAX as f32) * 2.0 - 1.0,
            out,
        ),
    }
}

fn downmix<T, F>(buf: &AudioBuffer<T>, convert: F, out: &mut Vec<f32>)
where
    T: symphonia::core::sample::Sample,
    F: Fn(T) -> f32,
{
    let frames = buf.frames();
    let channels = buf.spec().channels.count();
    if channels == 0 {
        return;
    }
    let planes = buf.planes();
    let planes = planes.planes();
    out.reserve(frames);
    for frame in 0..frames {
        let mut sum = 0.0f32;
        for plane in planes.iter().take(channels) {
            sum += convert(plane[frame]);
        }
        out.push(sum / channels as f32);
    }
}

/// Linear-interpolation resampling. Plenty for single-note samples; anything
/// fancier would be inaudible behind the per-trigger pitch jitter anyway.
fn resample(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<f32> {
    let ratio = target_rate as f64 / source_rate as f64;
    let target_frames = (samples.len() as f64 * ratio).ceil() as usize;

    let mut output = Vec::with_capacity(target_frames);
    for target_frame in 0..target_frames {
        let source_pos = target_frame as f64 / ratio;
        let source_frame = source_pos.floor() as usize;
        let frac = source_pos.fract() as f32;

        let s0 = samples.get(source_frame).copied().unwrap_or(0.0);
        let s1 = samples.get(source_frame + 1).copied().unwrap_or(s0);
        output.push(s0 + (s1 - s0) * frac);
    }
    output
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_resample_length() {
        let source: Vec<f32> = (0..4410)
            .map(|i| (2.0 * std::f32::consts::PI * 440.0 * i as f32 / 44100.0).sin())
            .collect();

        let result = resample(&source, 44100, 48000);
        let expected_len = (4410.0_f64 * 48000.0 / 44100.0).ceil() as usize;
        assert_eq!(result.len(), expected_len);
    }

    #[test]
    fn test_resample_preserves_constant_signal() {
        let source = vec![0.25f32; 1000];
        let result = resample(&source, 22050, 44100);
        // Everything except the extrapolated tail should stay at 0.25.
        for sample in &result[..result.len() - 2] {
            assert!((sample - 0.25).abs() < 1e-6);
        }
    }

    #[test]
    fn test_decode_wav_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");

        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("wav writer");
        for _ in 0..441 {
            writer.write_sample(8192i16).expect("write sample");
            writer.write_sample(-8192i16).expect("write sample");
        }
        writer.finalize().expect("finalize");

        let buffer = decode_file(&path, 44100).expect("decode");
        assert_eq!(buffer.sample_rate, 44100);
        assert_eq!(buffer.data.len(), 441);
        // Opposing channels cancel in the mono downmix.
        assert!(buffer.data.iter().all(|sample| sample.abs() < 1e-3));
    }

    #[test]
    fn test_decode_missing_file() {
        let result = decode_file(Path::new("/nonexistent/sample.wav"), 44100);
        assert!(matches!(result, Err(DecodeError::Io(_))));
    }
}
