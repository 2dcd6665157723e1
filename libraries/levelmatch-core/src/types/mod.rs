//! Audio data types

mod audio;

pub use audio::{DecodedAudio, SampleRate, WeightedAudio};
