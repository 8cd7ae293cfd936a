//! Bounded prefetching ahead of the training step.
//!
//! A dedicated producer thread runs the assembly pipeline and pushes
//! finished batches into a bounded channel; the consumer pulls them either
//! asynchronously or blocking. The channel capacity is the prefetch depth:
//! once it fills, the producer blocks until the consumer catches up, so
//! memory stays bounded no matter how far the reader could run ahead.
//!
//! Batches arrive strictly in production order. An upstream error is
//! delivered in-order as the final message and ends the stream; dropping
//! the loader closes the channel, which unblocks and retires the producer.

use crate::error::{PipelineError, Result};
use std::thread::JoinHandle;
use tokio::sync::mpsc;

enum Message<B> {
    Batch(B),
    Failed(PipelineError),
    EndOfTraversal,
}

/// Consumer half of the prefetch pipeline.
pub struct PrefetchLoader<B> {
    rx: mpsc::Receiver<Message<B>>,
    producer: Option<JoinHandle<()>>,
    finished: bool,
}

impl<B: Send + 'static> PrefetchLoader<B> {
    /// Spawn the producer thread over a batch stream.
    ///
    /// `depth` is the maximum number of finished batches held ahead of the
    /// consumer.
    pub fn spawn<I>(batches: I, depth: usize) -> Result<Self>
    where
        I: Iterator<Item = Result<B>> + Send + 'static,
    {
        if depth == 0 {
            return Err(PipelineError::Config(
                "prefetch depth must be greater than zero".to_string(),
            ));
        }

        let (tx, rx) = mpsc::channel(depth);
        let producer = std::thread::Builder::new()
            .name("batch-prefetch".to_string())
            .spawn(move || {
                for item in batches {
                    let message = match item {
                        Ok(batch) => Message::Batch(batch),
                        Err(e) => {
                            // Deliver the failure in-order, then stop.
                            let _ = tx.blocking_send(Message::Failed(e));
                            return;
                        }
                    };
                    if tx.blocking_send(message).is_err() {
                        // Consumer went away; nothing left to do.
                        return;
                    }
                }
                let _ = tx.blocking_send(Message::EndOfTraversal);
            })?;

        Ok(Self {
            rx,
            producer: Some(producer),
            finished: false,
        })
    }

    /// Receive the next batch, suspending the task while the queue is empty.
    ///
    /// Returns `None` once the traversal completed or after an error was
    /// delivered.
    pub async fn next_batch(&mut self) -> Option<Result<B>> {
        if self.finished {
            return None;
        }
        let message = self.rx.recv().await;
        self.translate(message)
    }

    /// Blocking variant of [`next_batch`](Self::next_batch) for synchronous
    /// training loops. Must not be called from async context.
    pub fn blocking_next(&mut self) -> Option<Result<B>> {
        if self.finished {
            return None;
        }
        let message = self.rx.blocking_recv();
        self.translate(message)
    }

    fn translate(&mut self, message: Option<Message<B>>) -> Option<Result<B>> {
        match message {
            Some(Message::Batch(batch)) => Some(Ok(batch)),
            Some(Message::Failed(e)) => {
                self.finished = true;
                Some(Err(e))
            }
            Some(Message::EndOfTraversal) | None => {
                self.finished = true;
                None
            }
        }
    }
}

impl<B> Drop for PrefetchLoader<B> {
    fn drop(&mut self) {
        // Closing the receiver fails the producer's next send, so it exits
        // even when the consumer stopped early.
        self.rx.close();
        if let Some(handle) = self.producer.take() {
            let _ = handle.join();
        }
    }
}

/// Synchronous iteration for consumers without a runtime.
impl<B: Send + 'static> Iterator for PrefetchLoader<B> {
    type Item = Result<B>;

    fn next(&mut self) -> Option<Self::Item> {
        self.blocking_next()
    }
}
