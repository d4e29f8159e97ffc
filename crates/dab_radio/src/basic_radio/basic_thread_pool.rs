use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Task = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Task>,
    /// Queued plus currently running tasks.
    total_tasks: usize,
    is_running: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    on_task: Condvar,
    on_done: Condvar,
}

/// Simple thread pool to decode the FIC and MSC subchannels across cores.
///
/// Tasks are pushed per frame and awaited with [`BasicThreadPool::wait_all`]
/// so the frame boundary stays a synchronisation point.
pub struct BasicThreadPool {
    shared: Arc<PoolShared>,
    threads: Vec<JoinHandle<()>>,
}

impl BasicThreadPool {
    /// `nb_threads = 0` selects the available hardware parallelism.
    pub fn new(nb_threads: usize) -> Self {
        let nb_threads = if nb_threads == 0 {
            std::thread::available_parallelism().map(|v| v.get()).unwrap_or(1)
        } else {
            nb_threads
        };

        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                total_tasks: 0,
                is_running: true,
            }),
            on_task: Condvar::new(),
            on_done: Condvar::new(),
        });

        let threads = (0..nb_threads)
            .map(|_| {
                let shared = shared.clone();
                std::thread::spawn(move || runner_thread(shared))
            })
            .collect();

        Self { shared, threads }
    }

    pub fn total_threads(&self) -> usize {
        self.threads.len()
    }

    pub fn push_task(&self, task: impl FnOnce() + Send + 'static) {
        let mut state = self.shared.state.lock().unwrap();
        if !state.is_running {
            return;
        }
        state.queue.push_back(Box::new(task));
        state.total_tasks += 1;
        self.shared.on_task.notify_one();
    }

    /// Blocks until every pushed task has finished.
    pub fn wait_all(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while state.total_tasks != 0 {
            state = self.shared.on_done.wait(state).unwrap();
        }
    }

    pub fn stop_all(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if !state.is_running {
                return;
            }
            state.is_running = false;
        }
        self.shared.on_task.notify_all();
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

impl Drop for BasicThreadPool {
    fn drop(&mut self) {
        self.stop_all();
    }
}

fn runner_thread(shared: Arc<PoolShared>) {
    loop {
        let task = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if !state.is_running {
                    return;
                }
                if let Some(task) = state.queue.pop_front() {
                    break task;
                }
                state = shared.on_task.wait(state).unwrap();
            }
        };

        task();

        let mut state = shared.state.lock().unwrap();
        state.total_tasks -= 1;
        if state.total_tasks == 0 {
            shared.on_done.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn runs_all_tasks_before_wait_all_returns() {
        let pool = BasicThreadPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..64 {
            let counter = counter.clone();
            pool.push_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::SeqCst), 64);
    }

    #[test]
    fn wait_all_with_no_tasks_returns_immediately() {
        let pool = BasicThreadPool::new(1);
        pool.wait_all();
    }

    #[test]
    fn stop_all_joins_the_workers() {
        let mut pool = BasicThreadPool::new(2);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = counter.clone();
            pool.push_task(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.wait_all();
        pool.stop_all();
        assert_eq!(pool.total_threads(), 0);
        // Pushing after stop is a quiet no-op
        pool.push_task(|| panic!("must not run"));
    }
}
