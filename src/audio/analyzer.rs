use std::sync::{Arc, Mutex};

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::config::AnalyzerConfig;

/// Latest byte spectrum, written by the render thread and read by UI pollers.
pub type SpectrumHandle = Arc<Mutex<Vec<u8>>>;

/// Frequency analyser on the master bus.
///
/// Collects a mono mix of the output; every `fft_size` frames it runs a
/// Blackman-windowed FFT, smooths magnitudes against the previous block and
/// maps them to bytes over `[min_db, max_db]`. The byte spectrum has
/// `fft_size / 2` bins.
pub struct FrequencyAnalyzer {
    fft: Arc<dyn Fft<f32>>,
    fft_size: usize,
    smoothing: f32,
    min_db: f32,
    max_db: f32,
    window: Vec<f32>,
    history: Vec<f32>,
    write_pos: usize,
    since_last: usize,
    scratch: Vec<Complex<f32>>,
    smoothed: Vec<f32>,
    bytes: Vec<u8>,
    published: SpectrumHandle,
}

impl FrequencyAnalyzer {
    pub fn new(config: &AnalyzerConfig) -> Self {
        let fft_size = config.fft_size.max(2);
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(fft_size);
        let bins = fft_size / 2;
        Self {
            fft,
            fft_size,
            smoothing: config.smoothing,
            min_db: config.min_db,
            max_db: config.max_db,
            window: blackman(fft_size),
            history: vec![0.0; fft_size],
            write_pos: 0,
            since_last: 0,
            scratch: vec![Complex::new(0.0, 0.0); fft_size],
            smoothed: vec![0.0; bins],
            bytes: vec![0; bins],
            published: Arc::new(Mutex::new(vec![0; bins])),
        }
    }

    /// Shared handle to the published spectrum.
    pub fn handle(&self) -> SpectrumHandle {
        Arc::clone(&self.published)
    }

    /// Feed interleaved stereo output.
    ///
    /// **Called on the real-time audio thread — no allocations.**
    pub fn push_stereo(&mut self, buf: &[f32]) {
        for frame in buf.chunks_exact(2) {
            self.history[self.write_pos] = 0.5 * (frame[0] + frame[1]);
            self.write_pos = (self.write_pos + 1) % self.fft_size;
            self.since_last += 1;
            if self.since_last >= self.fft_size {
                self.since_last = 0;
                self.analyse();
            }
        }
    }

    fn analyse(&mut self) {
        // Oldest sample sits at write_pos.
        for i in 0..self.fft_size {
            let s = self.history[(self.write_pos + i) % self.fft_size];
            self.scratch[i] = Complex::new(s * self.window[i], 0.0);
        }
        self.fft.process(&mut self.scratch);

        let range = self.max_db - self.min_db;
        let scale = 1.0 / self.fft_size as f32;
        for (k, smoothed) in self.smoothed.iter_mut().enumerate() {
            let mag = self.scratch[k].norm() * scale;
            *smoothed = self.smoothing * *smoothed + (1.0 - self.smoothing) * mag;
            let db = if *smoothed > 0.0 { 20.0 * smoothed.log10() } else { f32::NEG_INFINITY };
            let scaled = 255.0 * (db - self.min_db) / range;
            self.bytes[k] = scaled.clamp(0.0, 255.0) as u8;
        }

        // Skip publishing rather than block the render thread.
        if let Ok(mut out) = self.published.try_lock() {
            out.copy_from_slice(&self.bytes);
        }
    }
}

/// Blackman window (α = 0.16), as used by browser analysers.
fn blackman(n: usize) -> Vec<f32> {
    let a0 = 0.42;
    let a1 = 0.5;
    let a2 = 0.08;
    (0..n)
        .map(|i| {
            let x = std::f32::consts::TAU * i as f32 / n as f32;
            a0 - a1 * x.cos() + a2 * (2.0 * x).cos()
        })
        .collect()
}

/// Copy of the latest spectrum; a poisoned lock still yields its data.
pub fn read_spectrum(handle: &SpectrumHandle) -> Vec<u8> {
    match handle.lock() {
        Ok(g) => g.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(fft_size: usize) -> AnalyzerConfig {
        AnalyzerConfig { fft_size, smoothing: 0.0, ..AnalyzerConfig::default() }
    }

    #[test]
    fn silence_publishes_zeros() {
        let mut a = FrequencyAnalyzer::new(&config(256));
        a.push_stereo(&vec![0.0; 256 * 2]);
        let spectrum = read_spectrum(&a.handle());
        assert_eq!(spectrum.len(), 128);
        assert!(spectrum.iter().all(|&b| b == 0));
    }

    #[test]
    fn tone_peaks_at_its_bin() {
        let size = 512;
        let rate = 8_000.0;
        let bin = 32;
        let freq = bin as f32 * rate / size as f32;
        let mut a = FrequencyAnalyzer::new(&config(size));
        let buf: Vec<f32> = (0..size)
            .flat_map(|i| {
                let s = (std::f32::consts::TAU * freq * i as f32 / rate).sin() * 0.02;
                [s, s]
            })
            .collect();
        a.push_stereo(&buf);
        let spectrum = read_spectrum(&a.handle());
        let peak = spectrum.iter().enumerate().max_by_key(|(_, &b)| b).map(|(i, _)| i).unwrap();
        assert_eq!(peak, bin);
        assert!(spectrum[bin] > 150, "tone bin too quiet: {}", spectrum[bin]);
        assert!(spectrum[bin] > spectrum[bin + 1]);
        assert_eq!(spectrum[bin + 10], 0, "no leakage far from the tone");
    }

    #[test]
    fn nothing_published_before_a_full_block() {
        let mut a = FrequencyAnalyzer::new(&config(256));
        a.push_stereo(&vec![0.9; 100 * 2]);
        assert!(read_spectrum(&a.handle()).iter().all(|&b| b == 0));
    }

    #[test]
    fn window_is_symmetric_and_tapered() {
        let w = blackman(64);
        assert!(w[0].abs() < 1e-6);
        assert!((w[1] - w[63]).abs() < 1e-6);
        assert!(w[32] > 0.99);
    }
}
