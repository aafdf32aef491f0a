//! # Requeue Core
//!
//! Returns dead-lettered messages from an error queue to the queue they
//! originally failed from.
//!
//! The crate depends only on the collaborator traits of `requeue-runtime`
//! (queue provider, header codec, address resolver) plus an [`OutputSink`]
//! for operator-facing lines, so every piece can be swapped for a fake in tests.
//!
//! ## Usage
//!
//! ```no_run
//! use requeue_core::{ConsoleSink, RequeueOperator, RequeueSettings};
//! use requeue_runtime::{DirectFormatResolver, QueueProviderFactory, XmlHeaderCodec};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = RequeueSettings {
//!     input_queue: "error".to_string(),
//!     ..Default::default()
//! };
//! let provider = QueueProviderFactory::create_provider(&settings.provider).await?;
//! let operator = RequeueOperator::new(
//!     &settings,
//!     provider,
//!     Arc::new(XmlHeaderCodec::new()),
//!     Arc::new(DirectFormatResolver::new(settings.local_machine.clone())),
//!     Arc::new(ConsoleSink::stdout()),
//! )
//! .await?;
//!
//! let report = operator.return_all().await?;
//! println!("{} returned", report.returned);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod headers;
pub mod operator;
pub mod settings;
pub mod sink;

pub use error::{RequeueError, RequeueResult};
pub use operator::{BatchReport, RequeueOperator, ReturnOutcome, PROGRESS_INTERVAL};
pub use settings::RequeueSettings;
pub use sink::{ConsoleSink, OutputSink, RecordingSink, SinkEvent};
