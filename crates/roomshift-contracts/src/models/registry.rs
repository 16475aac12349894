use indexmap::IndexMap;

/// Capability tag for models that accept a base image plus an instruction
/// and return an edited image.
pub const IMAGE_EDIT: &str = "image_edit";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

/// Ordered model table; the first capable entry is the default.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn by_capability(&self, capability: &str, provider: Option<&str>) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .filter(|model| provider.map_or(true, |name| model.provider == name))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str, provider: Option<&str>) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if !model.supports(capability) {
            return None;
        }
        if provider.is_some_and(|expected| model.provider != expected) {
            return None;
        }
        Some(model.clone())
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |name: &str, provider: &str, capabilities: &[&str]| {
        map.insert(
            name.to_string(),
            ModelSpec {
                name: name.to_string(),
                provider: provider.to_string(),
                capabilities: capabilities
                    .iter()
                    .map(|item| (*item).to_string())
                    .collect(),
            },
        );
    };

    insert("gemini-2.5-flash-image", "gemini", &[IMAGE_EDIT]);
    insert("gemini-3-pro-image-preview", "gemini", &[IMAGE_EDIT]);
    insert("dryrun-image-1", "dryrun", &[IMAGE_EDIT]);

    map
}
