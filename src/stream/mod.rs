pub mod classify;
pub mod composer;
pub mod line_decoder;

pub use classify::{AnsweringClassifier, EventClassifier, ReasoningClassifier, UpstreamEvent};
pub use composer::{OutboundChunk, Phase, PhaseComposer};
pub use line_decoder::LineDecoder;
