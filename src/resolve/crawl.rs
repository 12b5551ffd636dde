//! Concurrent share-directory crawl.
//!
//! The crawl is an explicit task queue: a fixed pool of workers drains a
//! FIFO of tasks (directory pages and file entries) and accumulates
//! descriptors. Directory recursion becomes queue submission - a listed
//! subdirectory is pushed as a new page task rather than a nested call -
//! so call-stack depth is constant and pool lifetime is the lifetime of
//! one `crawl_directory` call.
//!
//! Fault isolation: a task failure is logged and dropped. A failed page
//! listing omits that directory's remaining subtree; siblings and
//! ancestors are unaffected.
//!
//! Termination: `pending` counts queued plus in-flight tasks. Workers
//! block on the notifier only while `pending` is non-zero and the queue is
//! empty; the worker that finishes the last task wakes everyone up to
//! observe the drained state.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, Notify};
use tokio::task::JoinSet;
use tracing::{trace, warn};

use super::{FileDescriptor, ShareApi, build_descriptor};

#[derive(Debug)]
enum CrawlTask {
    /// List one page of a directory; children fan out as new tasks.
    DirPage {
        file_id: String,
        token: Option<String>,
    },
    /// Turn one listed file into a descriptor.
    FileEntry {
        file_id: String,
        name: Option<String>,
        size: Option<i64>,
    },
}

struct CrawlState {
    queue: Mutex<VecDeque<CrawlTask>>,
    pending: AtomicUsize,
    notify: Notify,
    results: Mutex<Vec<FileDescriptor>>,
}

impl CrawlState {
    fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            pending: AtomicUsize::new(0),
            notify: Notify::new(),
            results: Mutex::new(Vec::new()),
        }
    }

    async fn push(&self, task: CrawlTask) {
        self.pending.fetch_add(1, Ordering::AcqRel);
        self.queue.lock().await.push_back(task);
        self.notify.notify_waiters();
    }

    async fn pop(&self) -> Option<CrawlTask> {
        self.queue.lock().await.pop_front()
    }

    /// Marks one task done; the last finisher wakes all parked workers.
    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.notify.notify_waiters();
        }
    }

    fn drained(&self) -> bool {
        self.pending.load(Ordering::Acquire) == 0
    }
}

/// Crawls a shared directory tree and returns the flattened union of all
/// discovered file descriptors.
pub(crate) async fn crawl_directory(
    api: Arc<ShareApi>,
    space_id: String,
    root_file_id: String,
    workers: usize,
) -> Vec<FileDescriptor> {
    let state = Arc::new(CrawlState::new());
    state
        .push(CrawlTask::DirPage {
            file_id: root_file_id,
            token: None,
        })
        .await;

    let mut pool = JoinSet::new();
    for worker in 0..workers.max(1) {
        let state = Arc::clone(&state);
        let api = Arc::clone(&api);
        let space_id = space_id.clone();
        pool.spawn(async move {
            run_worker(worker, &api, &space_id, &state).await;
        });
    }
    while pool.join_next().await.is_some() {}

    let mut results = state.results.lock().await;
    std::mem::take(&mut *results)
}

async fn run_worker(worker: usize, api: &ShareApi, space_id: &str, state: &CrawlState) {
    loop {
        if let Some(task) = state.pop().await {
            process_task(api, space_id, state, task).await;
            state.finish();
            continue;
        }
        if state.drained() {
            break;
        }

        // Queue empty but tasks in flight: park until new work is pushed
        // or the last task finishes. Register interest first, then
        // re-check, so a wake between the checks cannot be lost.
        let notified = state.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if state.drained() || !state.queue.lock().await.is_empty() {
            continue;
        }
        notified.await;
    }
    trace!(worker, "crawl worker drained");
}

async fn process_task(api: &ShareApi, space_id: &str, state: &CrawlState, task: CrawlTask) {
    match task {
        CrawlTask::FileEntry {
            file_id,
            name,
            size,
        } => {
            let descriptor = build_descriptor(api, space_id, &file_id, name, size);
            state.results.lock().await.push(descriptor);
        }
        CrawlTask::DirPage { file_id, token } => {
            let page = match api.list_children(&file_id, token.as_deref()).await {
                Ok(page) => page,
                Err(api_error) => {
                    warn!(
                        file_id = %file_id,
                        error = %api_error,
                        "cannot fetch files inside a shared directory; nested files will be omitted"
                    );
                    return;
                }
            };

            for child in page.children {
                if child.kind.as_deref() == Some("DIR") {
                    state
                        .push(CrawlTask::DirPage {
                            file_id: child.file_id,
                            token: None,
                        })
                        .await;
                } else {
                    state
                        .push(CrawlTask::FileEntry {
                            file_id: child.file_id,
                            name: child.name,
                            size: child.size,
                        })
                        .await;
                }
            }

            // Pages of one directory stay sequential: the next page is
            // only known (and enqueued) once this listing returned its
            // cursor.
            if !page.is_last
                && let Some(next) = page.next_page_token
            {
                state
                    .push(CrawlTask::DirPage {
                        file_id,
                        token: Some(next),
                    })
                    .await;
            }
        }
    }
}
