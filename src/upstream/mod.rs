pub mod answering;
pub mod reasoning;

pub use answering::AnsweringUpstream;
pub use reasoning::{ConversationHandle, ReasoningUpstream};
