//! Interaction core: the processor that ties response streaming, speech
//! capture, synthesis and playback together behind one handle.

pub mod orchestrator;
pub mod submission;

pub use orchestrator::{
    Orchestrator, OrchestratorConfig, OrchestratorEvent, Phase, Snapshot,
};
pub use submission::{Submission, SubmissionSource};
