mod registry;
mod selectors;

pub use registry::{ModelRegistry, ModelSpec, IMAGE_EDIT};
pub use selectors::{ModelSelection, ModelSelector};
