//! Format registry, converter graph, conversion cache, and conversion
//! engine for batch document conversion.
//!
//! A host populates a [`format::Formats`] registry, a
//! [`converter::Converters`] list, and a [`mover::Movers`] registry
//! (typically by parsing its own preferences file — that parsing step is
//! out of scope here), then hands all three to an [`engine::Engine`] to
//! discover and execute conversion chains between formats.

pub mod cache;
pub mod converter;
pub mod engine;
pub mod error;
pub mod format;
pub mod graph;
mod mover;
mod shell;
mod sniff;

pub use cache::{Cache, CachedItem};
pub use converter::{Converter, Converters};
pub use engine::{ConvertFlags, Engine, EngineOptions, LatexRunner, NullLatexRunner};
pub use error::{Error, Result};
pub use format::{CaseSensitivity, Format, FormatFlag, FormatId, Formats};
pub use graph::{ArrowId, Graph};
pub use mover::{Mover, Movers};
