//! Content collaborator boundary for the copydesk editing engine.
//!
//! Each campaign content type (speech, social post, press release, generic
//! content block) owns its current value. The oplog engine never mutates
//! content storage directly; it reads current values through the
//! `ContentSource` capability when taking checkpoints and otherwise only
//! emits mutation instructions back to the editor.
pub mod source;

pub use source::{ContentRegistry, ContentSource, InMemoryContent};

use serde::{Deserialize, Serialize};

/// The kinds of campaign content whose fields can be collaboratively edited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    Speech,
    SocialPost,
    PressRelease,
    /// Generic content block not tied to a specific campaign artifact.
    ContentBlock,
}

impl ContentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentType::Speech => "speech",
            ContentType::SocialPost => "social_post",
            ContentType::PressRelease => "press_release",
            ContentType::ContentBlock => "content_block",
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
