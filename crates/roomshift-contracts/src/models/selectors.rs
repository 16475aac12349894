use super::registry::{ModelRegistry, ModelSpec};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSelection {
    pub model: ModelSpec,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ModelSelector {
    pub registry: ModelRegistry,
}

impl ModelSelector {
    pub fn new(registry: Option<ModelRegistry>) -> Self {
        Self {
            registry: registry.unwrap_or_else(|| ModelRegistry::new(None)),
        }
    }

    /// Returns the requested model when it exists, has `capability` and
    /// belongs to `provider` (when given); otherwise the first capable model
    /// with a fallback reason.
    pub fn select(
        &self,
        requested: Option<&str>,
        capability: &str,
        provider: Option<&str>,
    ) -> Result<ModelSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(model) = self.registry.ensure(requested_value, capability, provider) {
                return Ok(ModelSelection {
                    model,
                    requested: Some(requested_value.to_string()),
                    fallback_reason: None,
                });
            }
            (
                Some(format!(
                    "Requested model '{requested_value}' unavailable for capability '{capability}'."
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (None, None)
        };

        let candidates = self.registry.by_capability(capability, provider);
        let Some(model) = candidates.first().cloned() else {
            return Err(match provider {
                Some(name) => format!(
                    "No models available for capability '{capability}' on provider '{name}'."
                ),
                None => format!("No models available for capability '{capability}'."),
            });
        };
        Ok(ModelSelection {
            model,
            requested: requested_text,
            fallback_reason,
        })
    }
}
