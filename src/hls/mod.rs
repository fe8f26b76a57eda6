pub mod rewriter;

pub use rewriter::{PlaylistRewriter, should_rewrite};
