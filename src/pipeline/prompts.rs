// src/pipeline/prompts.rs — Stage prompt templates

use minijinja::{context, Environment};

use super::types::Stimulus;
use crate::infra::errors::StimgenError;

const GENERATE_TEMPLATE: &str = "\
Please help me construct one item as stimuli for a psycholinguistic experiment based on the description:

Experimental stimuli design: {{ design }}

Existing stimuli: {{ previous }}

Requirement: {{ requirement }} Please return in JSON format.
";

const VALIDATE_TEMPLATE: &str = "\
Please verify the following NEW STIMULUS with utmost precision, ensuring they meet the Experimental stimuli design and following strict criteria.

NEW STIMULUS: {{ stimulus }};

Experimental stimuli design: {{ design }}

Please return in JSON format.
";

const SCORE_TEMPLATE: &str = "\
Please rate the following STIMULUS based on the Experimental stimuli design provided for a psychological experiment:

STIMULUS: {{ stimulus }}
Experimental stimuli design: {{ design }}

Please return in JSON format including the score for each dimension.
";

const GENERATION_REQUIREMENT: &str = "Please generate a new stimulus in the same format as the existing stimuli, and ensure that the new stimulus is different from those in the existing stimuli.";

/// The three stage templates, compiled once per run.
pub struct Prompts {
    env: Environment<'static>,
}

impl Prompts {
    pub fn new() -> Result<Self, StimgenError> {
        let mut env = Environment::new();
        env.add_template("generate", GENERATE_TEMPLATE)?;
        env.add_template("validate", VALIDATE_TEMPLATE)?;
        env.add_template("score", SCORE_TEMPLATE)?;
        Ok(Self { env })
    }

    pub fn generate(&self, design: &str, previous: &[Stimulus]) -> Result<String, StimgenError> {
        let previous = serde_json::to_string(previous)?;
        Ok(self.env.get_template("generate")?.render(context! {
            design => design,
            previous => previous,
            requirement => GENERATION_REQUIREMENT,
        })?)
    }

    pub fn validate(&self, design: &str, stimulus: &Stimulus) -> Result<String, StimgenError> {
        self.render_judging("validate", design, stimulus)
    }

    pub fn score(&self, design: &str, stimulus: &Stimulus) -> Result<String, StimgenError> {
        self.render_judging("score", design, stimulus)
    }

    fn render_judging(
        &self,
        name: &str,
        design: &str,
        stimulus: &Stimulus,
    ) -> Result<String, StimgenError> {
        let stimulus = serde_json::to_string(stimulus)?;
        Ok(self.env.get_template(name)?.render(context! {
            design => design,
            stimulus => stimulus,
        })?)
    }
}
