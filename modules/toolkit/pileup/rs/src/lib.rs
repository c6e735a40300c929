pub use config::{Config, Mode, Profile, Strategy};
pub use pipeline::Pipeline;
pub use variant::{Sample, Variant};

pub mod accumulator;
pub mod config;
pub mod format;
pub mod pipeline;
pub mod variant;
