use anyhow::Result;
use roomshift_contracts::aspect::AspectRatio;
use roomshift_contracts::assets::{strip_data_uri_prefix, ImageAsset};

use crate::provider::{GenerationRequest, ImageGenerator, Part};

pub const PERSONA_PREAMBLE: &str = "You are an expert interior design AI.";

/// Compensates for the model's tendency to zoom, crop and rescale. Every
/// redesign and refinement request carries it.
pub const INVARIANCE_DIRECTIVE: &str = "\
CRITICAL INSTRUCTIONS - READ CAREFULLY:

1.  **NO ZOOM / NO CROP**: The output image MUST have the exact same resolution, aspect ratio, and field of view as the input image. DO NOT zoom in. DO NOT pan the camera.
2.  **GEOMETRY LOCK**: The walls, floor, ceiling, and windows must remain in the EXACT same pixel coordinates.
3.  **OBJECT FREEZE**: If the prompt implies keeping an object (like a TV, a sofa, or \"furniture\"), you MUST NOT resize it. It must occupy the exact same pixels as the original.
4.  **IN-PAINTING LOGIC**: Treat this strictly as a material/texture swap for the requested changes. Do not re-render the structural geometry of the room.
5.  **OUTPUT FORMAT**: You must generate an image. Do not return only text.

NEGATIVE PROMPT (Implicit):
- DO NOT zoom in.
- DO NOT change the size of the TV.
- DO NOT change the perspective.
- DO NOT remove objects unless explicitly asked.";

pub const DEFAULT_PROMPT: &str = "I want a modern design for this room. KEEP the TV and the size of the room EXACTLY the same. Only change the decoration.";

/// Quick follow-ups offered next to the refine input.
pub const REFINE_PRESETS: [&str; 4] = [
    "Suggest improvements",
    "More lighting",
    "Add plants",
    "Industrial style",
];

/// Normalized response: the last image part and the last non-empty text
/// part. Either, both, or neither may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RedesignOutput {
    pub image: Option<ImageAsset>,
    pub text: Option<String>,
}

impl RedesignOutput {
    pub fn from_parts(parts: Vec<Part>) -> Self {
        let mut output = Self::default();
        for part in parts {
            match part {
                Part::Image(image) => output.image = Some(image),
                Part::Text(text) if !text.is_empty() => output.text = Some(text),
                Part::Text(_) => {}
            }
        }
        output
    }
}

pub fn compose_instruction(user_instruction: &str) -> String {
    format!(
        "{PERSONA_PREAMBLE}\n\nUSER REQUEST: \"{}\"\n\n{INVARIANCE_DIRECTIVE}",
        user_instruction.trim()
    )
}

/// Builds one request against `source` and normalizes the answer. Transport
/// and protocol errors from the generator are returned unchanged.
pub fn request_redesign(
    generator: &dyn ImageGenerator,
    model: &str,
    source: &ImageAsset,
    user_instruction: &str,
    aspect_ratio: AspectRatio,
) -> Result<RedesignOutput> {
    let request = GenerationRequest {
        model: model.to_string(),
        image: ImageAsset {
            mime_type: source.mime_type.clone(),
            data: strip_data_uri_prefix(&source.data).to_string(),
        },
        instruction: compose_instruction(user_instruction),
        aspect_ratio,
    };
    let parts = generator.generate(&request)?;
    Ok(RedesignOutput::from_parts(parts))
}
