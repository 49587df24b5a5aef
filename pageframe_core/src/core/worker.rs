use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use crate::configuration::Configuration;

use super::bus::MessageBus;

/// Fixed set of threads reducing published frames from every shard of a bus.
pub struct WorkerPool {
    bus: Arc<MessageBus>,
    halt: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(bus: Arc<MessageBus>, configuration: &Configuration) -> std::io::Result<Self> {
        let halt = Arc::new(AtomicBool::new(false));
        let idle_wait = configuration.worker_idle_wait();
        let mut handles = Vec::with_capacity(configuration.worker_count());

        for worker_id in 0..configuration.worker_count() {
            let bus = Arc::clone(&bus);
            let halt = Arc::clone(&halt);

            let handle = thread::Builder::new()
                .name(format!("pageframe-worker-{}", worker_id))
                .spawn(move || run_worker(worker_id, bus, halt, idle_wait))?;

            handles.push(handle);
        }

        log::info!("worker pool started [workers={}]", handles.len());

        Ok(Self { bus, halt, handles })
    }

    pub fn worker_count(&self) -> usize {
        self.handles.len()
    }

    /// Stops and joins every worker. Safe to call more than once.
    pub fn halt(&mut self) {
        if self.handles.is_empty() {
            return;
        }

        self.halt.store(true, Ordering::Release);
        for _ in 0..self.handles.len() {
            self.bus.notify_workers();
        }

        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                log::error!("worker thread panicked");
            }
        }

        log::info!("worker pool halted");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.halt();
    }
}

fn run_worker(worker_id: usize, bus: Arc<MessageBus>, halt: Arc<AtomicBool>, idle_wait: Duration) {
    let wake = bus.wake_receiver();
    let shard_count = bus.shard_count();

    log::debug!("worker {} started", worker_id);

    while !halt.load(Ordering::Acquire) {
        let mut reduced = false;

        for i in 0..shard_count {
            let shard = (worker_id + i) % shard_count;
            while bus.reduce_queue(shard).reduce_next() {
                reduced = true;
            }
        }

        if !reduced {
            _ = wake.recv_timeout(idle_wait);
        }
    }

    log::debug!("worker {} stopped", worker_id);
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Instant,
    };

    use super::*;
    use crate::core::queue::{FrameReducer, ReduceTask};

    struct Counting(AtomicUsize);

    impl FrameReducer for Counting {
        fn reduce(&self, _task: &mut ReduceTask) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn test_workers_drain_all_shards_and_halt() {
        let configuration = Configuration {
            shard_count: Some(2),
            queue_capacity: Some(8),
            worker_count: Some(3),
            ..Default::default()
        };
        let bus = Arc::new(MessageBus::new(&configuration));
        let mut pool = WorkerPool::start(Arc::clone(&bus), &configuration).unwrap();
        assert_eq!(pool.worker_count(), 3);

        let reducer = Arc::new(Counting(AtomicUsize::new(0)));
        for shard in 0..2 {
            let queue = bus.reduce_queue(shard);
            while let Some(mut claim) = queue.claim() {
                claim.task_mut().of(reducer.clone(), 1, 1, 0, 0);
                claim.publish();
            }
        }
        bus.notify_workers();

        let started = Instant::now();
        while reducer.0.load(Ordering::Relaxed) < 16 {
            assert!(started.elapsed() < Duration::from_secs(10), "workers stalled");
            thread::yield_now();
        }

        pool.halt();
        pool.halt();
        assert_eq!(pool.worker_count(), 0);
    }
}
