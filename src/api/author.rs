use super::{ChatModel, ChatRequest};
use crate::config::Config;
use crate::error::Result;
use crate::validation::strip_code_fences;
use tracing::info;

const GENERATOR_SYSTEM_PROMPT: &str = r#"You are a POV-Ray 3.7 scene description generator.

Translate the user's request into syntactically correct, render-ready POV-Ray SDL.

OUTPUT RULES
1. Output ONLY raw POV-Ray SDL code: no explanations, no markdown fences.
2. Start with these includes: colors.inc, textures.inc, finish.inc, metals.inc, stones.inc, woods.inc.
3. Always include exactly one camera, at least one light_source and every object the user describes.
4. All braces must balance. All identifiers must be declared before use.
5. Vectors use angle-bracket syntax <x, y, z>.
6. Never use isosurfaces, parametric functions, mesh2, macros or #version above 3.7.
7. If the user describes motion, declare `#declare Clock = 0;` after the includes and drive
   every animated value from Clock, which runs from 0.0 to 1.0.

Example structure:
#include "colors.inc"
#include "textures.inc"
#include "finish.inc"

camera { location <0, 2, -5> look_at <0, 1, 0> }
light_source { <10, 10, -10> color White }
sphere { <0, 1, 0>, 1 texture { pigment { color Red } finish { specular 0.4 } } }
"#;

const VERIFIER_SYSTEM_PROMPT: &str = r#"You are a strict POV-Ray 3.7 code reviewer.

Given the user's request and draft SDL code:
1. Fix syntax errors, missing includes and structural issues.
2. Ensure there is exactly one camera, at least one light_source and all requested geometry.
3. Ensure braces balance and pigment/finish/texture nesting is valid.
4. Keep any `#declare Clock = ...;` declaration and the animation driven by it.

Return ONLY the corrected POV-Ray code. No commentary, no markdown."#;

const REPAIR_SYSTEM_PROMPT: &str = r#"You are a POV-Ray debugger.

The scene below failed to render. Fix the error reported by the renderer without changing
what the scene depicts. Keep any `#declare Clock = ...;` declaration.

Return ONLY valid POV-Ray SDL code. No commentary, no markdown."#;

/// Writes, reviews and repairs scene code through the configured models.
pub struct SceneAuthor<M> {
    model: M,
    generator_model: String,
    verifier_model: Option<String>,
    repair_model: String,
}

impl<M: ChatModel> SceneAuthor<M> {
    pub fn new(model: M, config: &Config) -> Self {
        Self {
            model,
            generator_model: config.generator_model.clone(),
            verifier_model: config.verifier_model.clone(),
            repair_model: config.repair_model().to_string(),
        }
    }

    pub fn generator_model(&self) -> &str {
        &self.generator_model
    }

    pub fn verifier_model(&self) -> Option<&str> {
        self.verifier_model.as_deref()
    }

    #[cfg(test)]
    pub fn model(&self) -> &M {
        &self.model
    }

    pub async fn generate(&self, prompt: &str) -> Result<String> {
        info!("Generating scene code with model: {}", self.generator_model);
        let user = format!(
            "Generate a POV-Ray scene for: {prompt}\n\n\
             Ensure the scene is complete, visually interesting and uses proper POV-Ray SDL syntax. \
             Include all necessary components (camera, lights, objects, materials)."
        );
        let code = self
            .model
            .complete(&ChatRequest {
                model: &self.generator_model,
                system: GENERATOR_SYSTEM_PROMPT,
                user,
                temperature: 0.7,
                max_tokens: 4000,
            })
            .await?;
        Ok(strip_code_fences(&code))
    }

    /// Returns `Ok(None)` when verification is disabled.
    pub async fn verify(&self, prompt: &str, code: &str) -> Result<Option<String>> {
        let Some(model) = self.verifier_model.as_deref() else {
            return Ok(None);
        };
        info!("Verifying scene code with model: {}", model);
        let user = format!(
            "### USER REQUEST\n{prompt}\n\n### DRAFT CODE\n{code}\n\n\
             Review the code and return the corrected POV-Ray code only."
        );
        let verified = self
            .model
            .complete(&ChatRequest {
                model,
                system: VERIFIER_SYSTEM_PROMPT,
                user,
                temperature: 0.2,
                max_tokens: 4000,
            })
            .await?;
        Ok(Some(strip_code_fences(&verified)))
    }

    pub async fn repair(&self, code: &str, renderer_error: &str) -> Result<String> {
        info!("Auto-repairing scene code with model: {}", self.repair_model);
        let user = format!(
            "### RENDERER ERROR\n{renderer_error}\n\n### FAILED CODE\n{code}\n\n\
             Fix the error shown in the log. Return ONLY valid SDL code."
        );
        let repaired = self
            .model
            .complete(&ChatRequest {
                model: &self.repair_model,
                system: REPAIR_SYSTEM_PROMPT,
                user,
                temperature: 0.2,
                max_tokens: 4000,
            })
            .await?;
        Ok(strip_code_fences(&repaired))
    }
}
