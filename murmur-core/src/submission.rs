use tokio_util::sync::CancellationToken;

/// Where a submission's text came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmissionSource {
    /// Typed into the prompt.
    Typed,
    /// Produced by speech transcription. Handled identically to typed text.
    Transcribed,
}

/// One user request and everything downstream of it. A submission is
/// immutable once created; ending it early goes through its cancellation
/// token, which every task spawned on its behalf watches.
#[derive(Debug, Clone)]
pub struct Submission {
    pub id: u64,
    pub source: SubmissionSource,
    pub text: String,
    pub cancel: CancellationToken,
}

impl Submission {
    pub(crate) fn new(id: u64, source: SubmissionSource, text: String) -> Self {
        Self {
            id,
            source,
            text,
            cancel: CancellationToken::new(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
