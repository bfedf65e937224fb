//! Scripted transport shared by the unit tests.

use std::collections::HashMap;
use std::sync::Mutex;

use segload_transfer::BoxFuture;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::options::TransferOptions;
use crate::transport::{ProgressReporter, SegmentRequest, Transport, TransportResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behaviour {
    Succeed,
    Fail,
    HangUntilCancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Call {
    Started(usize),
    Finished(usize),
}

pub(crate) struct ScriptedTransport {
    default: Behaviour,
    overrides: HashMap<usize, Behaviour>,
    calls: Mutex<Vec<Call>>,
    requests: Mutex<Vec<SegmentRequest>>,
    cancelled: Mutex<Vec<usize>>,
}

impl ScriptedTransport {
    pub(crate) fn new(default: Behaviour) -> Self {
        Self {
            default,
            overrides: HashMap::new(),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with(mut self, index: usize, behaviour: Behaviour) -> Self {
        self.overrides.insert(index, behaviour);
        self
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(crate) fn requests(&self) -> Vec<SegmentRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn cancelled(&self) -> Vec<usize> {
        let mut out = self.cancelled.lock().unwrap().clone();
        out.sort_unstable();
        out
    }

    pub(crate) fn started(&self) -> Vec<usize> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Started(i) => Some(i),
                Call::Finished(_) => None,
            })
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(
        &'a self,
        request: SegmentRequest,
        _options: &'a TransferOptions,
        progress: ProgressReporter,
        cancel: CancellationToken,
    ) -> BoxFuture<'a, TransportResult> {
        Box::pin(async move {
            let index = request.index;
            let len = request.bytes.len() as u64;
            let behaviour = self.overrides.get(&index).copied().unwrap_or(self.default);
            self.calls.lock().unwrap().push(Call::Started(index));
            self.requests.lock().unwrap().push(request);

            progress.report(len / 2, len);
            tokio::task::yield_now().await;

            let result = match behaviour {
                Behaviour::Succeed => {
                    progress.report(len, len);
                    Ok(json!({ "index": index }))
                }
                Behaviour::Fail => Err(json!({ "status": 500, "index": index })),
                Behaviour::HangUntilCancelled => {
                    cancel.cancelled().await;
                    self.cancelled.lock().unwrap().push(index);
                    Err(json!("cancelled"))
                }
            };
            self.calls.lock().unwrap().push(Call::Finished(index));
            result
        })
    }
}
