//! Wires the uploader to the directory sink and reports on the run.

use std::path::PathBuf;
use std::sync::Arc;

use segload_uploader::{
    Admission, BatchOutcome, EventName, JobOutcome, PathSource, TransferJob, UploadEvent, Uploader,
    status_text,
};

use crate::config::Config;
use crate::sink::DirectoryTransport;

/// Uploads `files` into `dest` and returns the finished jobs. Fails if any
/// file did not make it.
pub async fn run(
    config: Config,
    dest: PathBuf,
    files: Vec<PathBuf>,
) -> anyhow::Result<Vec<TransferJob>> {
    let sink = Arc::new(DirectoryTransport::new(dest));
    let mut uploader_config = config.uploader_config(sink.clone());
    if config.resume {
        uploader_config = uploader_config.with_resume_check(sink.clone());
    }
    let uploader = Arc::new(Uploader::new(uploader_config));
    subscribe(&uploader);

    let admission = uploader.offer_from(&PathSource::new(files)).await;
    match admission {
        Admission::Rejected(err) => anyhow::bail!("files rejected: {err}"),
        Admission::Accepted { jobs, filtered, .. } => {
            for skipped in &filtered {
                tracing::warn!(file = %skipped.name, size = skipped.size, "skipped: too large");
            }
            tracing::info!(
                jobs = jobs.len(),
                dest = %sink.root().display(),
                "files queued"
            );
        }
    }

    // Ctrl-C aborts every job; completed segments stay recorded for resume.
    let watcher = tokio::spawn({
        let uploader = Arc::clone(&uploader);
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupted, aborting uploads");
                uploader.abort();
            }
        }
    });
    let outcome = uploader.transfer().await;
    watcher.abort();

    match outcome {
        BatchOutcome::Vetoed => anyhow::bail!("upload halted"),
        BatchOutcome::Finished(outcomes) => summarize(&outcomes)?,
    }
    Ok(uploader.jobs())
}

fn subscribe(uploader: &Uploader) {
    uploader.on(EventName::StatusChange, |event: &UploadEvent| {
        if let UploadEvent::StatusChange { job, status } = event {
            tracing::info!(file = %job.file_name(), "{}", status_text(*status));
        }
    });
    uploader.on(EventName::Progress, |event: &UploadEvent| {
        if let UploadEvent::Progress { job, segment, .. } = event {
            tracing::debug!(file = %job.file_name(), segment, percent = job.percent(), "progress");
        }
    });
    uploader.on(EventName::Error, |event: &UploadEvent| {
        if let UploadEvent::Error {
            job,
            segment,
            response,
        } = event
        {
            tracing::warn!(file = %job.file_name(), segment, %response, "segment failed");
        }
    });
}

fn summarize(outcomes: &[JobOutcome]) -> anyhow::Result<()> {
    let failed: Vec<&JobOutcome> = outcomes.iter().filter(|o| !o.is_success()).collect();
    for outcome in outcomes {
        match &outcome.error {
            None => tracing::info!(file = %outcome.file_name, status = %outcome.status, "done"),
            Some(err) => {
                tracing::error!(file = %outcome.file_name, status = %outcome.status, "failed: {err}")
            }
        }
    }
    if !failed.is_empty() {
        anyhow::bail!("{} of {} uploads failed", failed.len(), outcomes.len());
    }
    Ok(())
}
