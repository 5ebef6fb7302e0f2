//! Request composition for the generation oracle.

pub mod composer;
pub mod render;
pub mod templates;

pub use composer::{spec_block, ComposedRequest, ComposerConfig, PromptComposer, TemplateKind};
