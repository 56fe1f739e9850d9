//! Self-tuning worker pool with serialization queues and scheduled tasks.
//!
//! The pool keeps between `min_threads` and `max_threads` workers alive and
//! resizes itself from queue wait-time statistics: a maintenance thread
//! samples load every five seconds and, once per `responsiveness` cycles,
//! grows the pool when both the exponential and simple moving averages of
//! wait time sit above the high watermark, or shrinks it when both sit
//! below the low watermark and the 15-minute load average shows
//! over-provisioning.

use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of work.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

const UPDATE_INTERVAL: Duration = Duration::from_secs(5);

// Fixed-point exponential moving averages, matching alphas for 12, 60, 180
// and 1000 samples.
const EMA_FP_SHIFT: u32 = 11;
const EMA_FP_1: i64 = 1 << EMA_FP_SHIFT;
const EMA_EXP_12: i64 = 2 * EMA_FP_1 / 13;
const EMA_EXP_60: i64 = 2 * EMA_FP_1 / 61;
const EMA_EXP_180: i64 = 2 * EMA_FP_1 / 181;
const EMA_EXP_1000: i64 = 2 * EMA_FP_1 / 1001;

#[derive(Default, Clone, Copy)]
struct Ema(i64);

impl Ema {
    fn update(&mut self, exp: i64, value: i64) {
        self.0 = ((EMA_FP_1 - exp) * self.0 + exp * (value << EMA_FP_SHIFT)) >> EMA_FP_SHIFT;
    }

    fn value(&self) -> i64 {
        self.0 >> EMA_FP_SHIFT
    }
}

/// Welford's online mean/variance.
#[derive(Default, Clone, Copy)]
struct WelfordVariance {
    count: u64,
    mean: f64,
    m2: f64,
}

impl WelfordVariance {
    fn update(&mut self, value: f64) {
        self.count += 1;
        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    fn mean(&self) -> f64 {
        self.mean
    }

    fn sd(&self) -> f64 {
        if self.count > 0 { (self.m2 / self.count as f64).sqrt() } else { 0.0 }
    }

    fn reset(&mut self) {
        *self = WelfordVariance::default();
    }
}

enum WorkItem {
    Task { func: Task, queued_at: Instant },
    Stop { unregister: bool },
}

/// Blocking FIFO work queue.
struct WorkQueue {
    items: Mutex<VecDeque<WorkItem>>,
    available: Condvar,
}

impl WorkQueue {
    fn new() -> WorkQueue {
        WorkQueue {
            items: Mutex::new(VecDeque::new()),
            available: Condvar::new(),
        }
    }

    fn put(&self, item: WorkItem) {
        self.items.lock().unwrap().push_back(item);
        self.available.notify_one();
    }

    fn get_or_block(&self) -> WorkItem {
        let mut items = self.items.lock().unwrap();
        loop {
            if let Some(item) = items.pop_front() {
                return item;
            }
            items = self.available.wait(items).unwrap();
        }
    }

    fn len(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

struct ScheduledTask {
    run_at: Instant,
    seq: u64,
    func: Task,
}

impl PartialEq for ScheduledTask {
    fn eq(&self, other: &Self) -> bool {
        self.run_at == other.run_at && self.seq == other.seq
    }
}

impl Eq for ScheduledTask {}

impl PartialOrd for ScheduledTask {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTask {
    // Reversed so that the earliest run time sits on top of the max-heap.
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other
            .run_at
            .cmp(&self.run_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct SchedulerState {
    heap: BinaryHeap<ScheduledTask>,
    next_seq: u64,
}

/// Pending tasks for one serialization key.
#[derive(Default)]
struct SerializationQueue {
    tasks: VecDeque<(Task, Instant)>,
    max_wait: Duration,
}

struct PoolState {
    workers: HashMap<u64, JoinHandle<()>>,
    next_worker_id: u64,
    thread_start_count: u64,
    thread_stop_count: u64,
    load_average: [Ema; 3],
    wait_time_ema: Ema,
    wait_time_variance: WelfordVariance,
    queue_size_ema: Ema,
    queue_size_variance: WelfordVariance,
}

struct PoolInner {
    name: String,
    min_threads: usize,
    max_threads: usize,
    stack_size: usize,
    responsiveness: u32,
    wait_time_high_watermark: i64,
    wait_time_low_watermark: i64,

    queue: WorkQueue,
    state: Mutex<PoolState>,
    active_requests: AtomicI32,
    task_execution_count: AtomicU64,
    shutdown_mode: AtomicBool,
    maint_wakeup: (Mutex<bool>, Condvar),
    serialization: Mutex<HashMap<String, SerializationQueue>>,
    scheduler: Mutex<SchedulerState>,
}

/// Tunables beyond the thread count bounds.
#[derive(Debug, Clone, Copy)]
pub struct ThreadPoolOptions {
    /// Worker stack size in bytes; 0 selects the platform default.
    pub stack_size: usize,
    /// Resize decisions happen every this many 5-second cycles.
    pub responsiveness: u32,
    pub wait_time_high_watermark: Duration,
    pub wait_time_low_watermark: Duration,
}

impl Default for ThreadPoolOptions {
    fn default() -> Self {
        ThreadPoolOptions {
            stack_size: 0,
            responsiveness: 12,
            wait_time_high_watermark: Duration::from_millis(100),
            wait_time_low_watermark: Duration::from_millis(50),
        }
    }
}

/// Point-in-time pool statistics.
#[derive(Debug, Clone)]
pub struct ThreadPoolInfo {
    pub name: String,
    pub min_threads: usize,
    pub max_threads: usize,
    pub cur_threads: usize,
    pub thread_starts: u64,
    pub thread_stops: u64,
    pub active_requests: i32,
    pub total_requests: u64,
    pub load_average: [i64; 3],
    pub wait_time_ema_ms: i64,
    pub wait_time_sma_ms: i64,
    pub wait_time_sd: f64,
    pub queue_size_ema: i64,
    pub queue_size_sma: i64,
    pub queue_size_sd: f64,
    pub scheduled_requests: usize,
    pub serialized_requests: usize,
}

/// The worker pool.
pub struct ThreadPool {
    inner: Arc<PoolInner>,
    maint_thread: Mutex<Option<JoinHandle<()>>>,
}

fn worker_main(inner: Arc<PoolInner>, worker_id: u64) {
    loop {
        match inner.queue.get_or_block() {
            WorkItem::Stop { unregister } => {
                if unregister {
                    let mut state = inner.state.lock().unwrap();
                    state.workers.remove(&worker_id);
                    state.thread_stop_count += 1;
                }
                break;
            }
            WorkItem::Task { func, queued_at } => {
                let wait_ms = queued_at.elapsed().as_millis() as i64;
                {
                    let mut state = inner.state.lock().unwrap();
                    state.wait_time_ema.update(EMA_EXP_1000, wait_ms);
                    state.wait_time_variance.update(wait_ms as f64);
                }

                // A panicking task must not take the worker down.
                if catch_unwind(AssertUnwindSafe(func)).is_err() {
                    log::debug!("task in thread pool {} panicked", inner.name);
                }
                inner.active_requests.fetch_sub(1, Ordering::SeqCst);
            }
        }
    }
    log::debug!("worker thread in thread pool {} stopped", inner.name);
}

fn spawn_worker(inner: &Arc<PoolInner>, state: &mut PoolState) -> bool {
    let id = state.next_worker_id;
    state.next_worker_id += 1;

    let mut builder = thread::Builder::new().name(format!("{}/WRK", inner.name));
    if inner.stack_size > 0 {
        builder = builder.stack_size(inner.stack_size);
    }
    let pool = inner.clone();
    match builder.spawn(move || worker_main(pool, id)) {
        Ok(handle) => {
            state.workers.insert(id, handle);
            state.thread_start_count += 1;
            true
        }
        Err(e) => {
            log::debug!("cannot create worker thread in pool {}: {e}", inner.name);
            false
        }
    }
}

fn maintenance_main(inner: Arc<PoolInner>) {
    let mut count = 0u32;
    let mut sleep_time = UPDATE_INTERVAL;
    let mut cycle_time = Duration::ZERO;

    while !inner.shutdown_mode.load(Ordering::Acquire) {
        let start = Instant::now();
        {
            let guard = inner.maint_wakeup.0.lock().unwrap();
            let (mut guard, _) = inner.maint_wakeup.1.wait_timeout(guard, sleep_time).unwrap();
            *guard = false;
        }
        cycle_time += start.elapsed();

        if cycle_time >= UPDATE_INTERVAL {
            cycle_time = Duration::ZERO;

            let active = inner.active_requests.load(Ordering::SeqCst) as i64;
            let queue_size = inner.queue.len() as i64;
            let mut state = inner.state.lock().unwrap();
            state.load_average[0].update(EMA_EXP_12, active);
            state.load_average[1].update(EMA_EXP_60, active);
            state.load_average[2].update(EMA_EXP_180, active);
            state.queue_size_ema.update(EMA_EXP_180, queue_size);
            state.queue_size_variance.update(queue_size as f64);
            drop(state);

            count += 1;
            if count == inner.responsiveness {
                resize_pool(&inner);
                count = 0;
            }
        }
        sleep_time = UPDATE_INTERVAL.saturating_sub(cycle_time);

        // Promote due scheduled tasks and trim the sleep to the next one.
        let mut scheduler = inner.scheduler.lock().unwrap();
        let now = Instant::now();
        while let Some(top) = scheduler.heap.peek() {
            if top.run_at > now {
                let delay = top.run_at - now;
                if delay < sleep_time {
                    sleep_time = delay;
                }
                break;
            }
            let task = scheduler.heap.pop().unwrap();
            inner.active_requests.fetch_add(1, Ordering::SeqCst);
            inner.task_execution_count.fetch_add(1, Ordering::SeqCst);
            inner.queue.put(WorkItem::Task {
                func: task.func,
                queued_at: now,
            });
        }
    }
    log::debug!("maintenance thread for thread pool {} stopped", inner.name);
}

fn resize_pool(inner: &Arc<PoolInner>) {
    let mut started = 0usize;
    let mut stopped = 0usize;

    let mut state = inner.state.lock().unwrap();
    let thread_count = state.workers.len();
    let wait_time_ema = state.wait_time_ema.value();
    let wait_time_sma = state.wait_time_variance.mean() as i64;
    let queue_size_ema = state.queue_size_ema.value();
    let queue_size_sma = state.queue_size_variance.mean() as i64;
    let active = inner.active_requests.load(Ordering::SeqCst);

    if ((wait_time_ema > inner.wait_time_high_watermark)
        && (wait_time_sma > inner.wait_time_high_watermark)
        && (thread_count < inner.max_threads))
        || ((thread_count == 0) && (active > 0))
    {
        let step = (queue_size_sma.min(queue_size_ema) / 2).max(1) as usize;
        let delta = step.min(inner.max_threads - thread_count);
        for _ in 0..delta {
            if !spawn_worker(inner, &mut state) {
                break;
            }
            started += 1;
        }
    } else if (wait_time_ema < inner.wait_time_low_watermark)
        && (wait_time_sma < inner.wait_time_low_watermark)
        && (thread_count > inner.min_threads)
    {
        let load_average_15 = state.load_average[2].value().max(0) as usize;
        if load_average_15 < thread_count / 2 {
            stopped = (thread_count - 2 * load_average_15).min(thread_count - inner.min_threads);
        }
        for _ in 0..stopped {
            inner.queue.put(WorkItem::Stop { unregister: true });
        }
    }
    state.wait_time_variance.reset();
    state.queue_size_variance.reset();
    drop(state);

    if started > 0 {
        log::debug!(
            "{} worker(s) started in thread pool {} (wait time EMA/SMA = {}/{} ms, queue size EMA/SMA = {}/{})",
            started, inner.name, wait_time_ema, wait_time_sma, queue_size_ema, queue_size_sma
        );
    }
    if stopped > 0 {
        log::debug!(
            "requested stop for {} worker(s) in thread pool {} (wait time EMA/SMA = {}/{} ms)",
            stopped, inner.name, wait_time_ema, wait_time_sma
        );
    }
}

impl ThreadPool {
    /// Creates a pool with default tuning.
    pub fn new(name: &str, min_threads: usize, max_threads: usize) -> ThreadPool {
        ThreadPool::with_options(name, min_threads, max_threads, ThreadPoolOptions::default())
    }

    pub fn with_options(
        name: &str,
        min_threads: usize,
        max_threads: usize,
        options: ThreadPoolOptions,
    ) -> ThreadPool {
        let min_threads = min_threads.max(1);
        let max_threads = max_threads.max(min_threads);

        let inner = Arc::new(PoolInner {
            name: name.to_owned(),
            min_threads,
            max_threads,
            stack_size: options.stack_size,
            responsiveness: options.responsiveness.clamp(1, 24),
            wait_time_high_watermark: options.wait_time_high_watermark.as_millis() as i64,
            wait_time_low_watermark: options.wait_time_low_watermark.as_millis() as i64,
            queue: WorkQueue::new(),
            state: Mutex::new(PoolState {
                workers: HashMap::new(),
                next_worker_id: 0,
                thread_start_count: 0,
                thread_stop_count: 0,
                load_average: [Ema::default(); 3],
                wait_time_ema: Ema::default(),
                wait_time_variance: WelfordVariance::default(),
                queue_size_ema: Ema::default(),
                queue_size_variance: WelfordVariance::default(),
            }),
            active_requests: AtomicI32::new(0),
            task_execution_count: AtomicU64::new(0),
            shutdown_mode: AtomicBool::new(false),
            maint_wakeup: (Mutex::new(false), Condvar::new()),
            serialization: Mutex::new(HashMap::new()),
            scheduler: Mutex::new(SchedulerState {
                heap: BinaryHeap::new(),
                next_seq: 0,
            }),
        });

        {
            let mut state = inner.state.lock().unwrap();
            for _ in 0..min_threads {
                spawn_worker(&inner, &mut state);
            }
        }

        let maint_thread = {
            let inner = inner.clone();
            thread::Builder::new()
                .name(format!("{name}/MNT"))
                .spawn(move || maintenance_main(inner))
                .expect("cannot spawn pool maintenance thread")
        };

        log::debug!("thread pool {name} initialized (min={min_threads}, max={max_threads})");
        ThreadPool {
            inner,
            maint_thread: Mutex::new(Some(maint_thread)),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Runs a task as soon as a worker is free.
    pub fn execute(&self, f: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown_mode.load(Ordering::Acquire) {
            return;
        }
        self.inner.active_requests.fetch_add(1, Ordering::SeqCst);
        self.inner.task_execution_count.fetch_add(1, Ordering::SeqCst);
        self.inner.queue.put(WorkItem::Task {
            func: Box::new(f),
            queued_at: Instant::now(),
        });
    }

    /// Runs tasks sharing a key strictly in submission order, with at most
    /// one of them in flight.
    pub fn execute_serialized(&self, key: &str, f: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown_mode.load(Ordering::Acquire) {
            return;
        }

        let mut serialization = self.inner.serialization.lock().unwrap();
        match serialization.entry(key.to_owned()) {
            std::collections::hash_map::Entry::Occupied(mut entry) => {
                entry.get_mut().tasks.push_back((Box::new(f), Instant::now()));
                self.inner.task_execution_count.fetch_add(1, Ordering::SeqCst);
            }
            std::collections::hash_map::Entry::Vacant(entry) => {
                let queue = entry.insert(SerializationQueue::default());
                queue.tasks.push_back((Box::new(f) as Task, Instant::now()));
                drop(serialization);

                let inner = self.inner.clone();
                let key = key.to_owned();
                self.execute(move || process_serialized(&inner, &key));
            }
        }
    }

    /// Number of tasks queued behind the given serialization key.
    pub fn serialized_request_count(&self, key: &str) -> usize {
        self.inner
            .serialization
            .lock()
            .unwrap()
            .get(key)
            .map_or(0, |q| q.tasks.len())
    }

    /// Longest queue wait observed for the given serialization key.
    pub fn serialized_request_max_wait(&self, key: &str) -> Duration {
        self.inner
            .serialization
            .lock()
            .unwrap()
            .get(key)
            .map_or(Duration::ZERO, |q| q.max_wait)
    }

    /// Schedules a task for an absolute run time.
    pub fn schedule_absolute(&self, run_at: Instant, f: impl FnOnce() + Send + 'static) {
        if self.inner.shutdown_mode.load(Ordering::Acquire) {
            return;
        }
        {
            let mut scheduler = self.inner.scheduler.lock().unwrap();
            let seq = scheduler.next_seq;
            scheduler.next_seq += 1;
            scheduler.heap.push(ScheduledTask {
                run_at,
                seq,
                func: Box::new(f),
            });
        }
        let mut flag = self.inner.maint_wakeup.0.lock().unwrap();
        *flag = true;
        self.inner.maint_wakeup.1.notify_one();
    }

    /// Schedules a task after a delay; a zero delay executes immediately.
    pub fn schedule_relative(&self, delay: Duration, f: impl FnOnce() + Send + 'static) {
        if delay.is_zero() {
            self.execute(f);
        } else {
            self.schedule_absolute(Instant::now() + delay, f);
        }
    }

    pub fn info(&self) -> ThreadPoolInfo {
        let state = self.inner.state.lock().unwrap();
        let scheduled_requests = self.inner.scheduler.lock().unwrap().heap.len();
        let serialized_requests = self
            .inner
            .serialization
            .lock()
            .unwrap()
            .values()
            .map(|q| q.tasks.len())
            .sum();

        ThreadPoolInfo {
            name: self.inner.name.clone(),
            min_threads: self.inner.min_threads,
            max_threads: self.inner.max_threads,
            cur_threads: state.workers.len(),
            thread_starts: state.thread_start_count,
            thread_stops: state.thread_stop_count,
            active_requests: self.inner.active_requests.load(Ordering::SeqCst),
            total_requests: self.inner.task_execution_count.load(Ordering::SeqCst),
            load_average: [
                state.load_average[0].value(),
                state.load_average[1].value(),
                state.load_average[2].value(),
            ],
            wait_time_ema_ms: state.wait_time_ema.value(),
            wait_time_sma_ms: state.wait_time_variance.mean() as i64,
            wait_time_sd: state.wait_time_variance.sd(),
            queue_size_ema: state.queue_size_ema.value(),
            queue_size_sma: state.queue_size_variance.mean() as i64,
            queue_size_sd: state.queue_size_variance.sd(),
            scheduled_requests,
            serialized_requests,
        }
    }

    /// Graceful shutdown: waits for queued tasks, then stops every worker
    /// and the maintenance thread.
    pub fn shutdown(&self) {
        if self.inner.shutdown_mode.swap(true, Ordering::AcqRel) {
            return;
        }
        log::debug!("stopping threads in thread pool {}", self.inner.name);

        {
            let mut flag = self.inner.maint_wakeup.0.lock().unwrap();
            *flag = true;
            self.inner.maint_wakeup.1.notify_one();
        }
        if let Some(handle) = self.maint_thread.lock().unwrap().take() {
            let _ = handle.join();
        }

        let handles: Vec<JoinHandle<()>> = {
            let mut state = self.inner.state.lock().unwrap();
            let handles: Vec<_> = state.workers.drain().map(|(_, h)| h).collect();
            for _ in 0..handles.len() {
                self.inner.queue.put(WorkItem::Stop { unregister: false });
            }
            handles
        };
        for handle in handles {
            let _ = handle.join();
        }
        log::debug!("thread pool {} destroyed", self.inner.name);
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Drains one serialization queue on a pool worker.
fn process_serialized(inner: &Arc<PoolInner>, key: &str) {
    loop {
        let next = {
            let mut serialization = inner.serialization.lock().unwrap();
            match serialization.get_mut(key) {
                Some(queue) => match queue.tasks.pop_front() {
                    Some((func, queued_at)) => {
                        queue.max_wait = queue.max_wait.max(queued_at.elapsed());
                        Some(func)
                    }
                    None => {
                        serialization.remove(key);
                        None
                    }
                },
                None => None,
            }
        };
        match next {
            Some(func) => {
                if catch_unwind(AssertUnwindSafe(func)).is_err() {
                    log::debug!("serialized task for key {key:?} panicked");
                }
            }
            None => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn tasks_run_on_workers() {
        let pool = ThreadPool::new("test", 2, 4);
        let (tx, rx) = mpsc::channel();
        for i in 0..16 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap());
        }
        let mut seen: Vec<i32> = (0..16)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..16).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn serialized_tasks_keep_submission_order() {
        let pool = ThreadPool::new("serial", 4, 4);
        let order = Arc::new(Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel();

        for i in 0..64 {
            let order = order.clone();
            let tx = tx.clone();
            pool.execute_serialized("device-1", move || {
                order.lock().unwrap().push(i);
                tx.send(()).unwrap();
            });
        }
        for _ in 0..64 {
            rx.recv_timeout(Duration::from_secs(5)).unwrap();
        }
        assert_eq!(*order.lock().unwrap(), (0..64).collect::<Vec<_>>());
        pool.shutdown();
    }

    #[test]
    fn scheduled_task_runs_after_its_delay() {
        let pool = ThreadPool::new("sched", 1, 2);
        let (tx, rx) = mpsc::channel();
        let submitted = Instant::now();
        pool.schedule_relative(Duration::from_millis(200), move || {
            tx.send(Instant::now()).unwrap();
        });

        let ran_at = rx.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(ran_at.duration_since(submitted) >= Duration::from_millis(200));
        pool.shutdown();
    }

    #[test]
    fn panicking_task_does_not_kill_the_worker() {
        let pool = ThreadPool::new("panics", 1, 1);
        pool.execute(|| panic!("boom"));

        let (tx, rx) = mpsc::channel();
        pool.execute(move || tx.send(42).unwrap());
        assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 42);
        pool.shutdown();
    }

    #[test]
    fn info_reflects_configuration() {
        let pool = ThreadPool::new("info", 2, 8);
        let info = pool.info();
        assert_eq!(info.name, "info");
        assert_eq!(info.min_threads, 2);
        assert_eq!(info.max_threads, 8);
        assert_eq!(info.cur_threads, 2);
        pool.shutdown();
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPool::new("twice", 1, 1);
        pool.shutdown();
        pool.shutdown();
    }
}
