pub mod classifier;
pub mod patterns;
pub mod rewriter;

pub use classifier::{normalize, Classification, Classifier};
pub use patterns::{has_deictic_cue, is_end_phrase, parse_affirmation};
pub use rewriter::{Rewriter, Rewritten};
