pub mod cloud;
pub mod rig;

pub use cloud::SharedCloud;
pub use rig::{TestRig, at, sample_defaults, sample_pipeline, save_json};
