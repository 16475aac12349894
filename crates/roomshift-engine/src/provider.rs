use std::collections::BTreeMap;

use anyhow::Result;
use roomshift_contracts::aspect::AspectRatio;
use roomshift_contracts::assets::ImageAsset;

use crate::dryrun::DryrunGenerator;
use crate::gemini::GeminiGenerator;

/// One element of a generation response, in the order the provider
/// returned it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Part {
    Image(ImageAsset),
    Text(String),
}

/// What gets submitted to the external capability: the base image (raw
/// base64, no data-URI header), the fully composed instruction and the
/// target aspect ratio hint.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub image: ImageAsset,
    pub instruction: String,
    pub aspect_ratio: AspectRatio,
}

/// An external image-generation capability. Transport and protocol
/// failures are returned as errors; an empty part list is a valid answer.
pub trait ImageGenerator: Send + Sync {
    fn name(&self) -> &str;

    /// Names the credentials this generator still needs, if any.
    fn missing_credentials(&self) -> Option<&'static str> {
        None
    }

    fn generate(&self, request: &GenerationRequest) -> Result<Vec<Part>>;
}

#[derive(Default)]
pub struct ImageGeneratorRegistry {
    generators: BTreeMap<String, Box<dyn ImageGenerator>>,
}

impl ImageGeneratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<G: ImageGenerator + 'static>(&mut self, generator: G) {
        self.generators
            .insert(generator.name().to_string(), Box::new(generator));
    }

    pub fn get(&self, name: &str) -> Option<&dyn ImageGenerator> {
        self.generators.get(name).map(|generator| generator.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.generators.keys().cloned().collect()
    }
}

pub fn default_generator_registry() -> ImageGeneratorRegistry {
    let mut generators = ImageGeneratorRegistry::new();
    generators.register(DryrunGenerator::new());
    generators.register(GeminiGenerator::from_env());
    generators
}
