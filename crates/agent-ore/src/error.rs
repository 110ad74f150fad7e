//! Error display helpers.

use std::fmt::Write;

/// Extension methods for rendering an error and its full cause chain.
pub trait ErrorExt {
    /// Renders `self` followed by `caused by: ...` for every source error in
    /// the chain, all on one line. Intended for the final `eprintln!` at the
    /// top of `main`, where a multi-line backtrace is noise but the cause
    /// chain is the whole point.
    fn display_with_causes(&self) -> String;
}

impl ErrorExt for anyhow::Error {
    fn display_with_causes(&self) -> String {
        let mut out = format!("{self}");
        for cause in self.chain().skip(1) {
            write!(out, ": {cause}").expect("writing to a String cannot fail");
        }
        out
    }
}

impl ErrorExt for Box<dyn std::error::Error + Send + Sync> {
    fn display_with_causes(&self) -> String {
        let mut out = format!("{self}");
        let mut source = self.source();
        while let Some(err) = source {
            write!(out, ": {err}").expect("writing to a String cannot fail");
            source = err.source();
        }
        out
    }
}
