//! Decision-making core: turns timer ticks, forced requests and action results
//! into a serialized sequence of completion calls over one shared conversation.

pub mod context;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod ports;
pub mod prompts;
pub mod registry;
pub mod rendezvous;
pub mod reply;
pub mod scheduler;
pub mod testing;

pub use context::ConversationContext;
pub use error::DecisionError;
pub use gate::{PriorityClaim, ResponseGate, RespondingGuard};
pub use orchestrator::{Orchestrator, PeriodicOutcome, SkipReason};
pub use ports::{ActionEmitter, EmitError};
pub use registry::ActionRegistry;
pub use rendezvous::{RecordOutcome, RendezvousError, ResultRendezvous};
pub use reply::ActionChoice;
pub use scheduler::PeriodicScheduler;
