//! Process-wide table of calls in progress.

use chrono::{DateTime, Utc};
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use voxline_types::media::InboundEvent;

/// Lightweight metadata for one live call.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveCall {
    pub stream_sid: String,
    pub phone_number: Option<String>,
    pub started_at: DateTime<Utc>,
}

/// Active call SID -> metadata.
///
/// Holds no audio or turn state; that stays with the task driving the call.
/// Uses `std::sync::RwLock` because every acquisition is a single map
/// operation that never spans an `.await`.
#[derive(Clone, Default)]
pub struct CallRegistry {
    calls: Arc<RwLock<HashMap<String, ActiveCall>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a call. Returns `false` if the SID is already active.
    pub fn register(&self, call_sid: &str, call: ActiveCall) -> bool {
        let mut calls = match self.calls.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if calls.contains_key(call_sid) {
            return false;
        }
        calls.insert(call_sid.to_string(), call);
        true
    }

    pub fn deregister(&self, call_sid: &str) -> Option<ActiveCall> {
        let mut calls = match self.calls.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        calls.remove(call_sid)
    }

    pub fn get(&self, call_sid: &str) -> Option<ActiveCall> {
        match self.calls.read() {
            Ok(calls) => calls.get(call_sid).cloned(),
            Err(poisoned) => poisoned.into_inner().get(call_sid).cloned(),
        }
    }

    pub fn len(&self) -> usize {
        match self.calls.read() {
            Ok(calls) => calls.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Registers the call announced by the first `start` event on `inbound`.
///
/// A `start` for a SID that another socket already owns is replaced by
/// `stop`, so the orchestrator ends this stream without opening a session.
/// Later `start` events on the same socket pass through untouched.
pub fn track_calls<S>(registry: CallRegistry, inbound: S) -> impl Stream<Item = InboundEvent>
where
    S: Stream<Item = InboundEvent>,
{
    let mut claimed = false;
    inbound.map(move |event| match event {
        InboundEvent::Start { start } if !claimed => {
            claimed = true;
            let phone_number = start
                .custom_parameters
                .get("from")
                .or_else(|| start.custom_parameters.get("From"))
                .cloned();
            let registered = registry.register(
                &start.call_sid,
                ActiveCall {
                    stream_sid: start.stream_sid.clone(),
                    phone_number,
                    started_at: Utc::now(),
                },
            );
            if registered {
                InboundEvent::Start { start }
            } else {
                tracing::warn!(
                    call_sid = %start.call_sid,
                    stream_sid = %start.stream_sid,
                    "call already active on another stream, rejecting"
                );
                InboundEvent::Stop
            }
        }
        other => other,
    })
}
