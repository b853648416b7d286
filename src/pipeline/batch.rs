//! Background batch worker.
//!
//! Documents are rewritten one after another on a single worker thread.
//! Progress is sent over a channel; the cancel flag is only looked at
//! between documents, so a document in flight always finishes.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;

use super::{DocumentReport, ManualReviewList, Rewriter};
use crate::error::{Error, Result};

/// Events sent by the batch worker.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The batch has started.
    Started {
        /// Documents queued
        total: usize,
    },

    /// A document is being rewritten.
    DocumentStarted {
        /// 0-indexed position in the batch
        index: usize,
        /// Document path
        path: PathBuf,
    },

    /// A document was rewritten.
    DocumentDone {
        /// 0-indexed position in the batch
        index: usize,
        /// Document path
        path: PathBuf,
        /// Issue number consumed, if any
        issued: Option<u64>,
        /// Pictures inserted
        inserted: usize,
    },

    /// A document failed and was restored.
    DocumentFailed {
        /// 0-indexed position in the batch
        index: usize,
        /// Document path
        path: PathBuf,
        /// Error message
        error: String,
    },

    /// The batch stopped early on request.
    Cancelled {
        /// Documents processed before stopping
        processed: usize,
    },

    /// The batch is over.
    Finished {
        /// Documents rewritten
        succeeded: usize,
        /// Documents that failed
        failed: usize,
    },
}

impl ProgressEvent {
    /// Whether this is the last event of a batch.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProgressEvent::Finished { .. })
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    /// Documents attempted
    pub processed: usize,
    /// Documents rewritten
    pub succeeded: usize,
    /// Documents that failed
    pub failed: usize,
    /// Whether the batch was cancelled
    pub cancelled: bool,
    /// Reports of the rewritten documents
    pub reports: Vec<DocumentReport>,
    /// Documents needing manual review
    pub review: ManualReviewList,
}

/// Handle to a running batch.
pub struct BatchHandle {
    events: Receiver<ProgressEvent>,
    cancel: Arc<AtomicBool>,
    worker: JoinHandle<BatchReport>,
}

impl BatchHandle {
    /// Progress events; the channel closes when the worker exits.
    pub fn events(&self) -> &Receiver<ProgressEvent> {
        &self.events
    }

    /// Ask the worker to stop after the current document.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Wait for the worker and return its report.
    pub fn join(self) -> Result<BatchReport> {
        self.worker
            .join()
            .map_err(|_| Error::Other("Batch worker panicked".into()))
    }
}

/// Start rewriting `paths` on a background thread.
pub fn spawn_batch(rewriter: Rewriter, paths: Vec<PathBuf>) -> BatchHandle {
    let (tx, rx) = unbounded();
    let cancel = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&cancel);

    let worker = std::thread::spawn(move || run_batch(&rewriter, &paths, &flag, &tx));

    BatchHandle {
        events: rx,
        cancel,
        worker,
    }
}

/// Rewrite `paths` in order on the calling thread.
pub fn run_batch(
    rewriter: &Rewriter,
    paths: &[PathBuf],
    cancel: &AtomicBool,
    events: &Sender<ProgressEvent>,
) -> BatchReport {
    // A closed receiver only means nobody is watching.
    let send = |event: ProgressEvent| {
        let _ = events.send(event);
    };

    let mut report = BatchReport {
        review: ManualReviewList::with_clock(rewriter.store().options().clock),
        ..Default::default()
    };
    send(ProgressEvent::Started { total: paths.len() });

    for (index, path) in paths.iter().enumerate() {
        if cancel.load(Ordering::SeqCst) {
            log::info!("Batch cancelled after {} documents", report.processed);
            report.cancelled = true;
            send(ProgressEvent::Cancelled {
                processed: report.processed,
            });
            break;
        }

        send(ProgressEvent::DocumentStarted {
            index,
            path: path.clone(),
        });
        report.processed += 1;

        match rewriter.rewrite(path, &mut report.review) {
            Ok(doc) => {
                report.succeeded += 1;
                send(ProgressEvent::DocumentDone {
                    index,
                    path: path.clone(),
                    issued: doc.issued,
                    inserted: doc.inserted(),
                });
                report.reports.push(doc);
            }
            Err(e) => {
                report.failed += 1;
                send(ProgressEvent::DocumentFailed {
                    index,
                    path: path.clone(),
                    error: e.to_string(),
                });
            }
        }
    }

    log::info!(
        "Batch finished: {} succeeded, {} failed, {} for review",
        report.succeeded,
        report.failed,
        report.review.len()
    );
    send(ProgressEvent::Finished {
        succeeded: report.succeeded,
        failed: report.failed,
    });
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{Clock, CounterOptions, CounterStore, Sequence};
    use crate::model::{Document, Paragraph};
    use crate::oracle::{FlowOracle, OracleClient};
    use crate::patch::NumberingPattern;
    use crate::pipeline::PipelineOptions;
    use chrono::NaiveDate;
    use tempfile::TempDir;

    fn setup(count: usize) -> (TempDir, Rewriter, Vec<PathBuf>) {
        let dir = TempDir::new().unwrap();
        let clock = Clock::Fixed(
            NaiveDate::from_ymd_opt(2025, 6, 1)
                .unwrap()
                .and_hms_opt(10, 0, 0)
                .unwrap(),
        );
        let store = CounterStore::with_options(
            dir.path().join("config.json"),
            CounterOptions::new().with_clock(clock),
        );
        let rewriter = Rewriter::new(
            Arc::new(OracleClient::new(FlowOracle::new())),
            Arc::new(store),
            PipelineOptions::new().with_numbering(NumberingPattern::notification()),
        );

        let paths = (0..count)
            .map(|i| {
                let path = dir.path().join(format!("letter{}.json", i));
                let mut paragraphs = vec![
                    Paragraph::with_text("网络安全通报"),
                    Paragraph::with_text("〔2024〕第1期"),
                ];
                paragraphs.extend((0..6).map(|j| Paragraph::with_text(format!("正文{}", j))));
                Document::from_paragraphs(paragraphs).save(&path).unwrap();
                path
            })
            .collect();
        (dir, rewriter, paths)
    }

    #[test]
    fn test_batch_numbers_documents_in_order() {
        let (dir, rewriter, mut paths) = setup(3);
        paths.insert(1, dir.path().join("missing.json"));

        let handle = spawn_batch(rewriter.clone(), paths.clone());
        let report = handle.join().unwrap();

        assert_eq!(report.processed, 4);
        assert_eq!(report.succeeded, 3);
        assert_eq!(report.failed, 1);
        assert!(!report.cancelled);
        let issued: Vec<_> = report.reports.iter().map(|r| r.issued).collect();
        assert_eq!(issued, vec![Some(104), Some(105), Some(106)]);
        assert_eq!(rewriter.store().peek(Sequence::A).unwrap(), 107);
        assert_eq!(report.review.len(), 1);

        let last = Document::load(&paths[3]).unwrap();
        assert_eq!(last.paragraphs[1].text(), "〔2025〕第106期");
    }

    #[test]
    fn test_events_arrive_in_order() {
        let (_dir, rewriter, paths) = setup(2);
        let handle = spawn_batch(rewriter, paths);

        let events: Vec<ProgressEvent> = handle.events().iter().collect();
        assert!(matches!(events[0], ProgressEvent::Started { total: 2 }));
        assert!(matches!(events[1], ProgressEvent::DocumentStarted { index: 0, .. }));
        assert!(matches!(
            events[2],
            ProgressEvent::DocumentDone {
                index: 0,
                issued: Some(104),
                ..
            }
        ));
        assert!(events.last().unwrap().is_terminal());
        handle.join().unwrap();
    }

    #[test]
    fn test_cancel_between_documents() {
        let (_dir, rewriter, paths) = setup(3);
        let (tx, rx) = unbounded();
        let cancel = AtomicBool::new(true);

        let report = run_batch(&rewriter, &paths, &cancel, &tx);
        assert!(report.cancelled);
        assert_eq!(report.processed, 0);
        assert_eq!(rewriter.store().peek(Sequence::A).unwrap(), 104);

        drop(tx);
        let events: Vec<_> = rx.iter().collect();
        assert!(matches!(events[1], ProgressEvent::Cancelled { processed: 0 }));
    }
}
