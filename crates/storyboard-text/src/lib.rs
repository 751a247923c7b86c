//! Plain-text formats exchanged with the studio backend: storyboard listings,
//! multi-field shot prompts and the inline dialogue cue syntax.
//!
//! Every parser here is total: malformed input degrades to empty fields or
//! dropped lines, never to an error.

mod dialogue;
mod lexer;
mod prompts;
mod storyboard;

pub use dialogue::*;
pub use lexer::*;
pub use prompts::*;
pub use storyboard::*;
