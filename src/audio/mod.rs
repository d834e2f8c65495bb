//! Audio utilities: WAV I/O and resampling.

mod io;
pub mod resample;

pub use io::{concat, load_wav, save_wav, AudioBuffer};
pub use resample::{resample, ResampleQuality, Resampler};

/// Native output rate of the built-in waveform generator.
pub const SAMPLE_RATE: u32 = 24000;
