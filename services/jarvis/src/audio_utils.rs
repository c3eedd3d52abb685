use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use std::collections::VecDeque;

/// Input chunk length used when converting whole buffers between rates.
pub const RESAMPLE_CHUNK: usize = 1024;

/// Creates a resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,                     // No cutoff frequency, pass all frequencies
        PolynomialDegree::Cubic, // Cubic interpolation for quality
        chunk_size,
        1, // 1 channel (mono)
    )?;
    Ok(resampler)
}

/// Converts a complete, self-contained mono clip from one sample rate to
/// another. Audio that continues across buffers goes through a
/// [`StreamResampler`] instead.
///
/// The output has `round(len * to / from)` samples, aligned with the input
/// (the resampler's internal delay is removed).
pub fn resample(samples: &[f32], from: u32, to: u32) -> anyhow::Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(f64::from(from), f64::from(to), RESAMPLE_CHUNK)?;
    let expected = (samples.len() as f64 * f64::from(to) / f64::from(from)).round() as usize;
    let delay = resampler.output_delay();
    let mut out = Vec::with_capacity(expected + delay);

    let mut chunks = samples.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        out.extend_from_slice(&resampler.process(&[chunk], None)?[0]);
    }
    let rest = chunks.remainder();
    if !rest.is_empty() {
        out.extend_from_slice(&resampler.process_partial(Some(&[rest][..]), None)?[0]);
    }
    // Flush the delay line.
    while out.len() < expected + delay {
        let tail = resampler.process_partial(None::<&[&[f32]]>, None)?;
        if tail[0].is_empty() {
            break;
        }
        out.extend_from_slice(&tail[0]);
    }

    out.drain(..delay.min(out.len()));
    out.truncate(expected);
    Ok(out)
}

/// Converts an unbroken mono signal between rates, one piece at a time.
///
/// The resampler state carries over between calls, so consecutive pieces
/// join without the edge effects of converting each one on its own.
pub struct StreamResampler {
    resampler: FastFixedIn<f32>,
    input: Vec<f32>,
    output: VecDeque<f32>,
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> anyhow::Result<Self> {
        Ok(Self {
            resampler: create_resampler(f64::from(from), f64::from(to), RESAMPLE_CHUNK)?,
            input: Vec::with_capacity(RESAMPLE_CHUNK),
            output: VecDeque::new(),
        })
    }

    /// Feeds `samples` and returns whatever output they completed. Input
    /// short of a full resampler chunk waits for the next call.
    pub fn push(&mut self, samples: &[f32]) -> anyhow::Result<Vec<f32>> {
        self.input.extend_from_slice(samples);
        let mut out = Vec::new();
        let mut needed = self.resampler.input_frames_next();
        while self.input.len() >= needed {
            let converted = self.resampler.process(&[&self.input[..needed]], None);
            self.input.drain(..needed);
            out.extend_from_slice(&converted?[0]);
            needed = self.resampler.input_frames_next();
        }
        Ok(out)
    }

    /// Fills `out` with converted audio, asking `source` for as many input
    /// blocks as that takes. Surplus output is kept for the next call.
    pub fn pull(
        &mut self,
        out: &mut [f32],
        mut source: impl FnMut(&mut [f32]),
    ) -> anyhow::Result<()> {
        while self.output.len() < out.len() {
            self.input.resize(self.resampler.input_frames_next(), 0.0);
            source(self.input.as_mut_slice());
            let converted = self.resampler.process(&[&self.input[..]], None)?;
            self.output.extend(&converted[0]);
        }
        let n = out.len();
        for (dst, src) in out.iter_mut().zip(self.output.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        // Test creating a resampler with valid parameters
        let result = create_resampler(16000.0, 24000.0, 1024);
        assert!(result.is_ok());

        // Test creating a resampler with same input and output rates
        let result = create_resampler(24000.0, 24000.0, 1024);
        assert!(result.is_ok());

        // Test creating a resampler with downsampling
        let result = create_resampler(48000.0, 16000.0, 1024);
        assert!(result.is_ok());
    }

    #[test]
    fn test_resample_same_rate_is_identity() {
        let input = vec![0.1, -0.2, 0.3];
        assert_eq!(resample(&input, 24_000, 24_000).unwrap(), input);
        assert!(resample(&[], 24_000, 48_000).unwrap().is_empty());
    }

    #[test]
    fn test_resample_output_length() {
        let input = vec![0.25f32; 24_000];
        let up = resample(&input, 24_000, 48_000).unwrap();
        assert_eq!(up.len(), 48_000);

        let input = vec![0.25f32; 4_410];
        let down = resample(&input, 44_100, 16_000).unwrap();
        assert_eq!(down.len(), 1_600);
    }

    #[test]
    fn test_resample_preserves_dc_level() {
        let input = vec![0.5f32; 8_000];
        let out = resample(&input, 16_000, 24_000).unwrap();
        // Away from the edges a constant signal stays constant.
        let middle = &out[1_000..11_000];
        for &sample in middle {
            assert_abs_diff_eq!(sample, 0.5, epsilon = 0.01);
        }
    }

    #[test]
    fn test_streamed_pieces_join_without_dips() {
        for device_rate in [44_100, 48_000] {
            let mut converter = StreamResampler::new(24_000, device_rate).unwrap();
            // Callback-sized pulls over a steady signal, crossing many
            // resampler chunk boundaries.
            let mut out = Vec::new();
            for _ in 0..40 {
                let mut block = vec![0.0f32; 441];
                converter.pull(&mut block, |input| input.fill(0.5)).unwrap();
                out.extend(block);
            }
            for &sample in &out[64..] {
                assert_abs_diff_eq!(sample, 0.5, epsilon = 0.02);
            }
        }
    }

    #[test]
    fn test_stream_push_keeps_partial_input() {
        let mut converter = StreamResampler::new(48_000, 16_000).unwrap();
        assert!(converter.push(&[0.25; 100]).unwrap().is_empty());

        let mut out = Vec::new();
        for _ in 0..30 {
            out.extend(converter.push(&[0.25; 480]).unwrap());
        }
        // 14 500 input samples at a third of the rate, less what is still buffered.
        assert!(out.len() > 4_000 && out.len() <= 14_500 / 3 + 1);
        for &sample in &out[64..] {
            assert_abs_diff_eq!(sample, 0.25, epsilon = 0.01);
        }
    }
}
