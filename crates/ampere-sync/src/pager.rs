//! # Page Reader
//!
//! Turns a "get page" call into a bounded stream of batches.
//!
//! ## Pipeline
//! ```text
//! ┌───────────────────────────┐   mpsc(queue_depth)   ┌────────────────────┐
//! │  fetch task               │ ────── Vec<T> ──────► │  consumer          │
//! │  offset = 0               │                       │  (pull workers)    │
//! │  loop:                    │                       └────────────────────┘
//! │    page = fetch(offset)   │
//! │    empty?     → stop      │
//! │    error?     → log, stop │
//! │    cancelled? → stop      │
//! │    offset += page_size    │
//! │  until max_pages          │
//! └───────────────────────────┘
//! ```
//!
//! Pages are requested strictly in offset order. The next fetch overlaps with
//! the consumer draining the previous batch; the queue depth bounds how far
//! ahead fetching can run.

use chrono::{DateTime, Utc};
use std::future::Future;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::PullSettings;
use crate::error::SyncResult;
use crate::remote::PageRequest;

/// Paging parameters for one stream.
#[derive(Debug, Clone, PartialEq)]
pub struct PageOptions {
    pub page_size: u64,
    pub queue_depth: usize,
    pub max_pages: u32,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
}

impl Default for PageOptions {
    fn default() -> Self {
        PageOptions {
            page_size: 100,
            queue_depth: 10,
            max_pages: 100,
            date_from: None,
            date_to: None,
        }
    }
}

impl From<&PullSettings> for PageOptions {
    fn from(settings: &PullSettings) -> Self {
        PageOptions {
            page_size: settings.page_size,
            queue_depth: settings.queue_depth,
            max_pages: settings.max_pages,
            date_from: None,
            date_to: None,
        }
    }
}

impl PageOptions {
    pub fn with_range(mut self, date_from: Option<DateTime<Utc>>, date_to: Option<DateTime<Utc>>) -> Self {
        self.date_from = date_from;
        self.date_to = date_to;
        self
    }

    fn request(&self, offset: u64) -> PageRequest {
        PageRequest {
            offset,
            limit: self.page_size,
            date_from: self.date_from,
            date_to: self.date_to,
        }
    }
}

/// Starts paging with `fetch` and returns the stream of non-empty batches.
///
/// Fetch errors end the stream after logging; batches already queued stay
/// readable. Dropping the stream stops the fetch task at its next send.
pub fn read_pages<T, F, Fut>(
    mut fetch: F,
    options: PageOptions,
    cancel: CancellationToken,
) -> ReceiverStream<Vec<T>>
where
    T: Send + 'static,
    F: FnMut(PageRequest) -> Fut + Send + 'static,
    Fut: Future<Output = SyncResult<Vec<T>>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.queue_depth.max(1));

    tokio::spawn(async move {
        let mut offset = 0u64;
        let mut pages = 0u32;

        loop {
            if pages >= options.max_pages {
                warn!(pages, "Page ceiling reached, stopping");
                break;
            }
            if cancel.is_cancelled() {
                debug!(pages, "Paging cancelled");
                break;
            }

            let batch = match fetch(options.request(offset)).await {
                Ok(batch) => batch,
                Err(e) => {
                    warn!(offset, error = %e, "Page fetch failed, ending stream");
                    break;
                }
            };
            pages += 1;

            if batch.is_empty() {
                debug!(pages, "Remote signalled end of data");
                break;
            }

            debug!(offset, items = batch.len(), "Page fetched");
            offset += options.page_size;

            tokio::select! {
                sent = tx.send(batch) => {
                    if sent.is_err() {
                        break;
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    });

    ReceiverStream::new(rx)
}
