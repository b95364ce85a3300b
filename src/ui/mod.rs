pub mod icons;
pub mod progress;

pub use progress::{BatchProgressUI, UiMode, spawn_renderer};
