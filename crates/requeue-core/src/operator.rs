//! # Requeue Operator
//!
//! Moves messages from an error queue back to the queue recorded in their
//! `FailedQ` header.
//!
//! A single message is first looked up directly by id. When that lookup times
//! out, every message in the error queue is scanned for a matching original id
//! (`NServiceBus.OriginalId`, else `MessageId`) and the first match is moved.
//! Each move happens inside one transaction: the message is in exactly one of
//! the two queues at any observable point.
//!
//! Only the direct path bumps `ReturnToSourceQueueCount`; a move found by the
//! scan keeps the count it had.

use crate::error::{RequeueError, RequeueResult};
use crate::headers::{increment_retry_count, original_id, source_queue};
use crate::settings::RequeueSettings;
use crate::sink::OutputSink;
use requeue_runtime::{
    AddressResolver, HeaderCodec, LookupAction, Message, MessageId, QueueHandle, QueuePath,
    QueueProvider, Transaction,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "operator_tests.rs"]
mod tests;

/// Scanned messages per progress marker
pub const PROGRESS_INTERVAL: usize = 100;

// ============================================================================
// Outcomes
// ============================================================================

/// How a single requeue ended, when it did not fail
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnOutcome {
    /// Found by id and moved; `retry_count` is the header value written
    Returned {
        destination: QueuePath,
        retry_count: String,
    },

    /// Found by the header scan and moved without touching its headers
    ReturnedFromScan { destination: QueuePath },

    /// No `FailedQ` header; the message stays in the error queue
    MissingSourceQueue,

    /// Neither the lookup nor the scan found the message
    NotFound,
}

impl ReturnOutcome {
    pub fn is_returned(&self) -> bool {
        matches!(self, Self::Returned { .. } | Self::ReturnedFromScan { .. })
    }
}

/// Tally of a [`RequeueOperator::return_all`] run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchReport {
    /// Messages in the snapshot
    pub attempted: usize,

    pub returned: usize,

    /// Left in place: no source queue header, or gone before it was reached
    pub skipped: usize,

    pub failed: usize,
}

impl BatchReport {
    pub fn is_complete_success(&self) -> bool {
        self.failed == 0
    }
}

// ============================================================================
// RequeueOperator
// ============================================================================

/// Returns messages from the configured error queue to their source queues
pub struct RequeueOperator {
    input: Arc<dyn QueueHandle>,
    provider: Arc<dyn QueueProvider>,
    codec: Arc<dyn HeaderCodec>,
    resolver: Arc<dyn AddressResolver>,
    sink: Arc<dyn OutputSink>,
    receive_timeout: Duration,
}

impl RequeueOperator {
    /// Open the input queue named by the settings
    ///
    /// # Errors
    ///
    /// - `RequeueError::Configuration` - invalid settings, or a non-transactional
    ///   input queue while `clustered` is off
    /// - `RequeueError::Address` - the input queue address does not parse
    /// - `RequeueError::Queue` - the input queue cannot be opened
    pub async fn new(
        settings: &RequeueSettings,
        provider: Arc<dyn QueueProvider>,
        codec: Arc<dyn HeaderCodec>,
        resolver: Arc<dyn AddressResolver>,
        sink: Arc<dyn OutputSink>,
    ) -> RequeueResult<Self> {
        settings.validate()?;

        let path = resolver.resolve(&settings.input_queue)?;
        let input = provider.open_queue(&path).await?;

        if !settings.clustered && !input.is_transactional() {
            return Err(RequeueError::Configuration {
                message: format!("Queue '{}' must be transactional.", path),
            });
        }

        debug!(
            input_queue = %path,
            clustered = settings.clustered,
            provider = %provider.provider_type(),
            "Requeue operator ready"
        );

        Ok(Self {
            input,
            provider,
            codec,
            resolver,
            sink,
            receive_timeout: settings.receive_timeout(),
        })
    }

    /// Path of the error queue this operator drains
    pub fn input_queue(&self) -> &QueuePath {
        self.input.path()
    }

    /// Return every message currently in the error queue
    ///
    /// Works on a snapshot taken at the start. A failure on one message is
    /// reported and counted, and the batch moves on.
    ///
    /// # Errors
    ///
    /// Only when the snapshot itself cannot be taken.
    pub async fn return_all(&self) -> RequeueResult<BatchReport> {
        let messages = self.input.peek_all().await?;
        let mut report = BatchReport::default();

        info!(
            input_queue = %self.input.path(),
            count = messages.len(),
            "Returning all messages"
        );

        for message in messages {
            report.attempted += 1;

            match self.return_message_to_source_queue(&message.id).await {
                Ok(outcome) if outcome.is_returned() => report.returned += 1,
                Ok(_) => report.skipped += 1,
                Err(e) => {
                    error!(message_id = %message.id, error = %e, "Failed to return message");
                    self.sink.failure(&message.id, &e);
                    report.failed += 1;
                }
            }
        }

        info!(
            attempted = report.attempted,
            returned = report.returned,
            skipped = report.skipped,
            failed = report.failed,
            "Finished returning messages"
        );
        Ok(report)
    }

    /// Return one message to the queue it failed from
    ///
    /// # Errors
    ///
    /// Queue access failures other than the lookup timeout, undecodable headers
    /// on the message found by id, and unparseable `FailedQ` addresses.
    pub async fn return_message_to_source_queue(
        &self,
        id: &MessageId,
    ) -> RequeueResult<ReturnOutcome> {
        let mut tx = Transaction::new();

        match self
            .input
            .receive_by_id(id, self.receive_timeout, &mut tx)
            .await
        {
            Ok(message) => self.return_received(message, tx).await,
            Err(e) if e.is_timeout() => {
                tx.rollback();
                debug!(message_id = %id, "Direct lookup timed out, scanning headers");
                self.sink.no_message_found(id);
                self.scan_and_return(id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Direct path; the message is locked to `tx`, which rolls back on any early exit
    async fn return_received(
        &self,
        mut message: Message,
        mut tx: Transaction,
    ) -> RequeueResult<ReturnOutcome> {
        let mut headers = self.codec.extract_headers(&message)?;

        let Some(failed_queue) = source_queue(&headers).map(str::to_owned) else {
            warn!(message_id = %message.id, "Message has no source queue header");
            self.sink.missing_source_queue();
            tx.rollback();
            return Ok(ReturnOutcome::MissingSourceQueue);
        };

        let retry_count = increment_retry_count(&mut headers);
        self.codec.save_headers(&headers, &mut message)?;

        let destination = self.resolver.resolve(&failed_queue)?;
        let target = self.provider.open_queue(&destination).await?;
        target.send(&message, &mut tx).await?;
        tx.commit().await?;

        info!(
            message_id = %message.id,
            destination = %destination,
            retry_count = %retry_count,
            "Returned message to source queue"
        );
        self.sink.success();

        Ok(ReturnOutcome::Returned {
            destination,
            retry_count,
        })
    }

    /// Fallback path: find the first message whose original id matches
    async fn scan_and_return(&self, id: &MessageId) -> RequeueResult<ReturnOutcome> {
        let messages = self.input.peek_all().await?;
        let mut examined = 0usize;

        for message in messages {
            examined += 1;
            if examined % PROGRESS_INTERVAL == 0 {
                self.sink.progress();
            }

            let headers = match self.codec.extract_headers(&message) {
                Ok(headers) => headers,
                Err(e) => {
                    warn!(
                        lookup_id = %message.lookup_id,
                        error = %e,
                        "Skipping message with unreadable headers"
                    );
                    continue;
                }
            };

            if original_id(&headers) != Some(id.as_str()) {
                continue;
            }

            if examined >= PROGRESS_INTERVAL {
                self.sink.scan_finished();
            }
            debug!(message_id = %id, lookup_id = %message.lookup_id, examined, "Found message by header");
            self.sink.found_message();

            let Some(failed_queue) = source_queue(&headers) else {
                warn!(lookup_id = %message.lookup_id, "Message has no source queue header");
                self.sink.missing_source_queue();
                return Ok(ReturnOutcome::MissingSourceQueue);
            };

            let destination = self.resolver.resolve(failed_queue)?;
            self.move_scanned(&message, &destination).await?;

            info!(
                message_id = %id,
                destination = %destination,
                "Returned message to source queue from header scan"
            );
            self.sink.success();
            return Ok(ReturnOutcome::ReturnedFromScan { destination });
        }

        if examined >= PROGRESS_INTERVAL {
            self.sink.scan_finished();
        }
        info!(message_id = %id, examined, "No message found in headers");
        self.sink.not_found_in_headers(id);
        Ok(ReturnOutcome::NotFound)
    }

    /// Send the scanned copy, then take that exact instance off the error queue
    async fn move_scanned(&self, message: &Message, destination: &QueuePath) -> RequeueResult<()> {
        let target = self.provider.open_queue(destination).await?;

        let mut tx = Transaction::new();
        target.send(message, &mut tx).await?;
        self.input
            .receive_by_lookup_id(LookupAction::Current, message.lookup_id, &mut tx)
            .await?;
        tx.commit().await?;

        Ok(())
    }
}
