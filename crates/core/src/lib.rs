pub mod classifier;
pub mod concept;
pub mod context;
pub mod error;
pub mod llm_client;
pub mod orchestrator;
pub mod phase;
pub mod prompt;
pub mod query;
pub mod retrieval;
pub mod store;

pub use context::SessionContext;
pub use error::{Result, TutorError};
pub use orchestrator::{TransitionOutcome, TurnEvent, TurnOrchestrator, TutorSettings};
pub use phase::{Choice, Phase};
