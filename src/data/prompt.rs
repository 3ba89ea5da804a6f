//! Prompt rendering.
//!
//! Generation and training share one layout:
//!
//! ```text
//! <bos>{system}<user>{problem}<assistant><think>{logic}</think><answer>{answer}</answer>
//! └──────────── generation prompt ──────────┘
//! └───────────────────────── training prompt ─────────────────┘└──── target ────┘
//! ```

use crate::config::PromptConfig;

/// Renders prompts from a [`PromptConfig`].
#[derive(Debug, Clone, Default)]
pub struct PromptTemplate {
    config: PromptConfig,
}

impl PromptTemplate {
    pub fn new(config: PromptConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PromptConfig {
        &self.config
    }

    /// Prompt sent to the reasoning model when collecting trajectories.
    pub fn generation_prompt(&self, problem: &str) -> String {
        let c = &self.config;
        format!(
            "{}{}{}{}{}",
            c.bos_marker, c.system_prompt, c.user_marker, problem, c.assistant_marker
        )
    }

    /// Training prompt: everything up to and including the answer open tag.
    pub fn training_prompt(&self, problem: &str, logic: &str) -> String {
        let c = &self.config;
        format!(
            "{}{}{}{}{}",
            self.generation_prompt(problem),
            c.think_open,
            logic,
            c.think_close,
            c.answer_open
        )
    }

    /// Supervised target following the training prompt.
    pub fn target(&self, answer: &str) -> String {
        format!("{answer}{}", self.config.answer_close)
    }

    /// Number of region open tags emitted before the reasoning region begins.
    ///
    /// This is the occurrence index the span locator must use for prompts
    /// rendered by this template (assuming the problem text has no tags).
    pub fn open_tags_in_prefix(&self) -> usize {
        self.generation_prompt("")
            .matches(self.config.think_open.as_str())
            .count()
    }
}
