// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Bounded task queue served by a fixed pool of workers.
//!
//! Each worker takes one task, runs it to completion and only then takes the
//! next, so the pool size bounds how many submissions (and remote commands)
//! run at once. Tasks are processed in FIFO order; there is no priority and
//! nothing is persisted.
//!
//! Closing the queue stops new tasks from being accepted; workers finish
//! what is already queued and exit.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::{Error, Result};

/// Processes queued tasks.
#[async_trait]
pub trait TaskHandler<T>: Send + Sync + 'static {
    /// Handle one task. Errors are the handler's to report.
    async fn handle(&self, task: T);
}

/// Bounded FIFO queue with a fixed worker pool.
pub struct WorkerQueue<T> {
    name: String,
    sender: StdMutex<Option<mpsc::Sender<T>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<T: Send + 'static> WorkerQueue<T> {
    /// Start `workers` workers feeding tasks to `handler`.
    ///
    /// At most `capacity` tasks wait in the queue; `enqueue` waits for room
    /// beyond that.
    pub fn start<H>(name: impl Into<String>, workers: usize, capacity: usize, handler: Arc<H>) -> Self
    where
        H: TaskHandler<T>,
    {
        let name = name.into();
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));

        let handles = (0..workers.max(1))
            .map(|index| {
                tokio::spawn(worker_loop(
                    format!("{}-{}", name, index),
                    receiver.clone(),
                    handler.clone(),
                ))
            })
            .collect();

        info!(queue = %name, workers, capacity, "Worker queue started");

        Self {
            name,
            sender: StdMutex::new(Some(sender)),
            workers: Mutex::new(handles),
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<T>> {
        self.sender.lock().ok().and_then(|guard| guard.clone())
    }

    /// Queue a task, waiting while the queue is full.
    pub async fn enqueue(&self, task: T) -> Result<()> {
        let sender = self
            .sender()
            .ok_or_else(|| Error::QueueClosed(self.name.clone()))?;
        sender
            .send(task)
            .await
            .map_err(|_| Error::QueueClosed(self.name.clone()))
    }

    /// Number of tasks waiting for a worker.
    pub fn pending(&self) -> usize {
        self.sender()
            .map(|sender| sender.max_capacity() - sender.capacity())
            .unwrap_or_default()
    }

    /// Stop accepting tasks. Queued tasks are still processed.
    pub fn close(&self) {
        if let Ok(mut guard) = self.sender.lock()
            && guard.take().is_some()
        {
            debug!(queue = %self.name, "Worker queue closed");
        }
    }

    /// Close the queue and wait for workers to drain it.
    pub async fn shutdown(&self) {
        self.close();
        let handles: Vec<JoinHandle<()>> = self.workers.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                error!(queue = %self.name, error = %e, "Worker task failed");
            }
        }
        info!(queue = %self.name, "Worker queue stopped");
    }
}

async fn worker_loop<T, H>(name: String, receiver: Arc<Mutex<mpsc::Receiver<T>>>, handler: Arc<H>)
where
    T: Send + 'static,
    H: TaskHandler<T>,
{
    debug!(worker = %name, "Worker started");

    loop {
        // Only one idle worker waits on the channel at a time
        let task = receiver.lock().await.recv().await;
        let Some(task) = task else {
            break;
        };

        let handler = handler.clone();
        // A panicking task must not take the worker down with it
        if let Err(e) = tokio::spawn(async move { handler.handle(task).await }).await {
            error!(worker = %name, error = %e, "Task panicked");
        }
    }

    debug!(worker = %name, "Worker stopped");
}
