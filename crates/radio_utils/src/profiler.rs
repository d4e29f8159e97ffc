use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::thread::ThreadId;
use std::time::Instant;

/// One completed timing span on some thread.
#[derive(Debug, Clone)]
pub struct ProfileSpan {
    pub name: &'static str,
    pub depth: usize,
    pub elapsed_micros: u64,
}

#[derive(Default)]
struct ThreadTrace {
    depth: usize,
    spans: Vec<ProfileSpan>,
}

/// Process-wide registry of per-thread timing traces.
///
/// Created on first use and lives until process exit. Spans are recorded with
/// [`Profiler::scope`]; a snapshot of every thread's trace is available
/// through [`Profiler::snapshot`].
pub struct Profiler {
    traces: Mutex<HashMap<ThreadId, ThreadTrace>>,
}

static INSTANCE: OnceLock<Profiler> = OnceLock::new();

impl Profiler {
    pub fn get() -> &'static Profiler {
        INSTANCE.get_or_init(|| Profiler {
            traces: Mutex::new(HashMap::new()),
        })
    }

    /// Starts a scoped timing span on the calling thread.
    /// The span is recorded when the guard drops.
    pub fn scope(&'static self, name: &'static str) -> ProfileScope {
        let thread_id = std::thread::current().id();
        {
            let mut traces = self.lock_traces();
            let trace = traces.entry(thread_id).or_default();
            trace.depth += 1;
        }
        ProfileScope {
            profiler: self,
            name,
            thread_id,
            start: Instant::now(),
        }
    }

    /// Copies out every thread's recorded spans.
    pub fn snapshot(&self) -> HashMap<ThreadId, Vec<ProfileSpan>> {
        let traces = self.lock_traces();
        traces
            .iter()
            .map(|(id, trace)| (*id, trace.spans.clone()))
            .collect()
    }

    pub fn clear(&self) {
        let mut traces = self.lock_traces();
        traces.clear();
    }

    fn lock_traces(&self) -> MutexGuard<'_, HashMap<ThreadId, ThreadTrace>> {
        // A poisoned registry only ever holds timing data, keep going
        self.traces.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn record(&self, thread_id: ThreadId, name: &'static str, elapsed_micros: u64) {
        let mut traces = self.lock_traces();
        let trace = traces.entry(thread_id).or_default();
        trace.depth = trace.depth.saturating_sub(1);
        let depth = trace.depth;
        trace.spans.push(ProfileSpan {
            name,
            depth,
            elapsed_micros,
        });
    }
}

pub struct ProfileScope {
    profiler: &'static Profiler,
    name: &'static str,
    thread_id: ThreadId,
    start: Instant,
}

impl Drop for ProfileScope {
    fn drop(&mut self) {
        let elapsed = self.start.elapsed().as_micros() as u64;
        self.profiler.record(self.thread_id, self.name, elapsed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_nested_scopes_with_depth() {
        let profiler = Profiler::get();
        profiler.clear();
        {
            let _outer = profiler.scope("outer");
            let _inner = profiler.scope("inner");
        }
        let snapshot = profiler.snapshot();
        let spans = &snapshot[&std::thread::current().id()];
        let inner = spans.iter().find(|s| s.name == "inner").unwrap();
        let outer = spans.iter().find(|s| s.name == "outer").unwrap();
        assert_eq!(inner.depth, 1);
        assert_eq!(outer.depth, 0);
    }
}
