// Library exports for testing and reuse

pub mod classify;
pub mod cli;
pub mod cog;
pub mod composite;
pub mod config;
pub mod crs;
pub mod error;
pub mod filter;
pub mod indices;
pub mod io;
pub mod mask;
pub mod pipeline;
pub mod roi;
pub mod scene;
pub mod visualize;
pub mod window;

// Re-export commonly used types
pub use classify::LandCover;
pub use composite::{Composite, Reducer};
pub use config::RunConfig;
pub use error::{CompositeError, Result};
pub use mask::{mask_scene, CloudMask, MaskedImage};
pub use pipeline::{run, RunOutputs, RunSummary};
pub use roi::Roi;
