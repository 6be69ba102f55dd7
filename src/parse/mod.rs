#[allow(clippy::module_inception)]
mod parse;

pub use parse::*;
