use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::debug;

use crate::indexer::Indexer;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PathBuf>,
    // 尚未开始处理的路径，用于去重
    queued: HashSet<PathBuf>,
    draining: bool,
    processed: u64,
}

/// 增量更新队列：监听回调只负责入队，单个 drain 任务按 FIFO 逐个调用 update_file。
/// 队列清空后 drain 任务退出，下次入队时再启动。
pub struct UpdateQueue {
    state: Mutex<QueueState>,
    indexer: Arc<Indexer>,
    runtime: Handle,
    idle: Notify,
}

impl UpdateQueue {
    pub fn new(indexer: Arc<Indexer>, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(QueueState::default()),
            indexer,
            runtime,
            idle: Notify::new(),
        })
    }

    /// 入队后立即返回，可在任意线程调用
    pub fn enqueue(self: &Arc<Self>, path: PathBuf) {
        let start_drain = {
            let mut state = self.state.lock();
            // 已在排队的路径执行时会读取最新状态，无需重复入队
            if state.queued.insert(path.clone()) {
                state.pending.push_back(path);
            }
            if state.draining {
                false
            } else {
                state.draining = true;
                true
            }
        };
        if start_drain {
            let queue = self.clone();
            self.runtime.spawn(async move { queue.drain().await });
        }
    }

    async fn drain(self: Arc<Self>) {
        loop {
            let next = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(path) => {
                        state.queued.remove(&path);
                        Some(path)
                    }
                    None => {
                        state.draining = false;
                        None
                    }
                }
            };
            let Some(path) = next else {
                self.idle.notify_waiters();
                return;
            };
            let outcome = self.indexer.update_file(&path).await;
            debug!("增量更新 {}: {:?}", path.display(), outcome);
            self.state.lock().processed += 1;
        }
    }

    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub fn is_busy(&self) -> bool {
        let state = self.state.lock();
        state.draining || !state.pending.is_empty()
    }

    pub fn processed(&self) -> u64 {
        self.state.lock().processed
    }

    /// 等待队列处理完毕
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if !self.is_busy() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::index::IndexStore;
    use crate::mem_store::MemoryFileStore;
    use std::path::Path;

    fn setup() -> (Arc<MemoryFileStore>, Arc<Indexer>, Arc<UpdateQueue>) {
        let store = Arc::new(MemoryFileStore::new());
        let indexer = Arc::new(Indexer::new(
            store.clone(),
            Arc::new(IndexStore::new()),
            Arc::new(EngineConfig::default()),
        ));
        let queue = UpdateQueue::new(indexer.clone(), Handle::current());
        (store, indexer, queue)
    }

    #[tokio::test]
    async fn drains_all_paths_then_stops() {
        let (store, indexer, queue) = setup();
        store.add_file("/w/a.txt", "alpha");
        store.add_file("/w/b.txt", "beta");
        queue.enqueue(PathBuf::from("/w/a.txt"));
        queue.enqueue(PathBuf::from("/w/b.txt"));
        queue.wait_idle().await;

        assert!(!queue.is_busy());
        assert_eq!(queue.pending(), 0);
        assert!(indexer.index().contains(Path::new("/w/a.txt")));
        assert!(indexer.index().contains(Path::new("/w/b.txt")));

        // 停止后再次入队会重新启动
        store.remove("/w/a.txt");
        queue.enqueue(PathBuf::from("/w/a.txt"));
        queue.wait_idle().await;
        assert!(!indexer.index().contains(Path::new("/w/a.txt")));
    }

    #[tokio::test]
    async fn later_state_wins_for_same_path() {
        let (store, indexer, queue) = setup();
        store.add_file("/w/c.txt", "first");
        queue.enqueue(PathBuf::from("/w/c.txt"));
        store.remove("/w/c.txt");
        queue.enqueue(PathBuf::from("/w/c.txt"));
        queue.wait_idle().await;
        assert!(!indexer.index().contains(Path::new("/w/c.txt")));

        store.add_file("/w/c.txt", "second version");
        queue.enqueue(PathBuf::from("/w/c.txt"));
        queue.wait_idle().await;
        let entry = indexer.index().get(Path::new("/w/c.txt")).unwrap();
        assert_eq!(entry.content(), Some("second version"));
    }

    #[tokio::test]
    async fn duplicate_pending_paths_are_coalesced() {
        let (store, _indexer, queue) = setup();
        store.add_file("/w/d.txt", "x");
        {
            // 占住 draining 标记，模拟 drain 正在处理别的路径
            queue.state.lock().draining = true;
        }
        queue.enqueue(PathBuf::from("/w/d.txt"));
        queue.enqueue(PathBuf::from("/w/d.txt"));
        queue.enqueue(PathBuf::from("/w/e.txt"));
        assert_eq!(queue.pending(), 2);

        queue.clone().drain().await;
        assert_eq!(queue.processed(), 2);
        assert!(!queue.is_busy());
    }

    #[tokio::test]
    async fn enqueue_works_from_plain_threads() {
        let (store, indexer, queue) = setup();
        store.add_file("/w/t.txt", "threaded");
        let q = queue.clone();
        std::thread::spawn(move || q.enqueue(PathBuf::from("/w/t.txt")))
            .join()
            .unwrap();
        queue.wait_idle().await;
        assert!(indexer.index().contains(Path::new("/w/t.txt")));
    }
}
