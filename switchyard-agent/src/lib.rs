// ABOUTME: Agent execution layer for the switchyard gateway.
// ABOUTME: Provider contract, conversation history, narration heuristic, and the run loop.

pub mod directory;
pub mod history;
pub mod mock;
pub mod narration;
pub mod provider;
pub mod runner;

pub use directory::{AgentDirectory, AgentProfile};
pub use history::{ChatMessage, ConversationHistory, HistoryStore, Role};
pub use mock::{MockProvider, ScriptedItem};
pub use narration::{NarrationClassifier, RegexNarrationClassifier};
pub use provider::{
    ChatProvider, ChatRequest, ProviderConfig, StreamEvent, ToolCallAccumulator,
};
pub use runner::{AgentRunner, RunOutcome};
