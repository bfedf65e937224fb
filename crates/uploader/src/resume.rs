//! Resume negotiation: asking the remote side which segments it already has.
//!
//! A [`ResumeCheck`] receives the job and a one-shot [`ResumeCallback`]. It
//! eventually completes the callback with one "already received" flag per
//! segment plus an opaque response. The job marks every flagged segment as
//! complete without calling the transport.

use segload_transfer::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::job::TransferJob;

/// The negotiator's answer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResumeReply {
    /// One flag per segment. `None` means nothing was received.
    pub received: Option<Vec<bool>>,
    pub response: Value,
}

/// One-shot completion handle handed to [`ResumeCheck::check`].
///
/// Dropping it without calling [`complete`](Self::complete) counts as
/// "nothing received".
#[derive(Debug)]
pub struct ResumeCallback {
    tx: oneshot::Sender<ResumeReply>,
}

impl ResumeCallback {
    pub(crate) fn channel() -> (Self, oneshot::Receiver<ResumeReply>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    pub fn complete(self, received: Option<Vec<bool>>, response: Value) {
        // The job may already have given up waiting.
        let _ = self.tx.send(ResumeReply { received, response });
    }
}

/// Asks a remote authority which segments of a job are already stored.
///
/// Called at most once per transfer attempt, after segmentation and
/// hashing, so `job.content_hash()` and `job.segment_count()` are set.
pub trait ResumeCheck: Send + Sync {
    fn check<'a>(&'a self, job: &'a TransferJob, done: ResumeCallback) -> BoxFuture<'a, ()>;
}

/// Validates a reply against the segment count.
///
/// Returns the per-segment flags when they are usable, `None` otherwise.
pub(crate) fn received_flags(
    reply: &ResumeReply,
    segment_count: usize,
    job: &TransferJob,
) -> Option<Vec<bool>> {
    match &reply.received {
        None => {
            debug!(job = %job.id(), "resume check reported nothing received");
            None
        }
        Some(flags) if flags.len() != segment_count => {
            debug!(
                job = %job.id(),
                expected = segment_count,
                got = flags.len(),
                "ignoring malformed resume reply"
            );
            None
        }
        Some(flags) => Some(flags.clone()),
    }
}

/// Awaits the negotiator and its callback, degrading every failure mode to
/// "nothing received".
pub(crate) async fn negotiate(check: &dyn ResumeCheck, job: &TransferJob) -> ResumeReply {
    let (callback, rx) = ResumeCallback::channel();
    check.check(job, callback).await;
    match rx.await {
        Ok(reply) => reply,
        Err(_) => {
            debug!(job = %job.id(), "resume callback dropped without a reply");
            ResumeReply::default()
        }
    }
}
