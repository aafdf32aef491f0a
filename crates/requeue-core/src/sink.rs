//! # Operator Output
//!
//! Console lines shown to the person running a requeue. These are plain
//! diagnostics, separate from the `tracing` log stream.

use crate::error::RequeueError;
use requeue_runtime::MessageId;
use std::io::Write;
use std::sync::Mutex;

/// Receiver of operator-facing diagnostics
pub trait OutputSink: Send + Sync {
    /// Direct lookup timed out; a header scan follows
    fn no_message_found(&self, id: &MessageId);

    /// Header scan finished without a match
    fn not_found_in_headers(&self, id: &MessageId);

    /// Header scan matched a message
    fn found_message(&self);

    /// Message has no `FailedQ` header and stays where it is
    fn missing_source_queue(&self);

    fn success(&self);

    /// One marker per hundred scanned messages
    fn progress(&self);

    /// A message of a batch could not be returned
    fn failure(&self, id: &MessageId, error: &RequeueError);

    /// Ends a run of progress markers
    fn scan_finished(&self);
}

// ============================================================================
// ConsoleSink
// ============================================================================

/// Writes diagnostics as text lines, to stdout unless told otherwise
pub struct ConsoleSink<W: Write + Send = std::io::Stdout> {
    out: Mutex<W>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl Default for ConsoleSink<std::io::Stdout> {
    fn default() -> Self {
        Self::stdout()
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    pub fn new(out: W) -> Self {
        Self {
            out: Mutex::new(out),
        }
    }

    /// Hand back the writer, e.g. to inspect captured output
    pub fn into_inner(self) -> W {
        match self.out.into_inner() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    // Console output is best effort; a closed stdout must not abort a requeue
    fn write(&self, text: &str) {
        let mut out = match self.out.lock() {
            Ok(out) => out,
            Err(poisoned) => poisoned.into_inner(),
        };
        let _ = out.write_all(text.as_bytes());
        let _ = out.flush();
    }

    fn line(&self, text: &str) {
        self.write(&format!("{}\n", text));
    }
}

impl<W: Write + Send> OutputSink for ConsoleSink<W> {
    fn no_message_found(&self, id: &MessageId) {
        self.line(&format!(
            "INFO: No message found with ID '{}'. Checking headers of all messages.",
            id
        ));
    }

    fn not_found_in_headers(&self, id: &MessageId) {
        self.line(&format!("INFO: No message found with ID '{}' in any headers.", id));
    }

    fn found_message(&self) {
        self.line("Found message - going to return to queue.");
    }

    fn missing_source_queue(&self) {
        self.line(
            "ERROR: Message does not have a header indicating from which queue it came. \
             Cannot be automatically returned to queue.",
        );
    }

    fn success(&self) {
        self.line("Success.");
    }

    fn progress(&self) {
        self.write(".");
    }

    fn failure(&self, id: &MessageId, error: &RequeueError) {
        self.line(&format!("Failed to return message '{}': {}", id, error));
    }

    fn scan_finished(&self) {
        self.write("\n");
    }
}

// ============================================================================
// RecordingSink
// ============================================================================

/// Diagnostic captured by [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkEvent {
    NoMessageFound(MessageId),
    NotFoundInHeaders(MessageId),
    FoundMessage,
    MissingSourceQueue,
    Success,
    Progress,
    Failure { id: MessageId, error: String },
    ScanFinished,
}

/// Sink that keeps every diagnostic in memory
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events seen so far, oldest first
    pub fn events(&self) -> Vec<SinkEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn count(&self, event: &SinkEvent) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn record(&self, event: SinkEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}

impl OutputSink for RecordingSink {
    fn no_message_found(&self, id: &MessageId) {
        self.record(SinkEvent::NoMessageFound(id.clone()));
    }

    fn not_found_in_headers(&self, id: &MessageId) {
        self.record(SinkEvent::NotFoundInHeaders(id.clone()));
    }

    fn found_message(&self) {
        self.record(SinkEvent::FoundMessage);
    }

    fn missing_source_queue(&self) {
        self.record(SinkEvent::MissingSourceQueue);
    }

    fn success(&self) {
        self.record(SinkEvent::Success);
    }

    fn progress(&self) {
        self.record(SinkEvent::Progress);
    }

    fn failure(&self, id: &MessageId, error: &RequeueError) {
        self.record(SinkEvent::Failure {
            id: id.clone(),
            error: error.to_string(),
        });
    }

    fn scan_finished(&self) {
        self.record(SinkEvent::ScanFinished);
    }
}

#[cfg(test)]
#[path = "sink_tests.rs"]
mod tests;
