//! Physical outputs and sensors: lighting relay, presence sensor, speaker

pub mod gpio;
mod lighting;
pub mod presence;
mod sound;

pub use gpio::{InputPin, MemoryPin, NoopPin, OutputPin, SysfsPin};
pub use lighting::{LightingController, LightingStatus};
pub use sound::{CpalSound, NoopSound, Pattern, SoundPlayer, play_best_effort};
