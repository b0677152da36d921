//! EventLoopPool - shared reactor dengan fixed worker threads
//!
//! Setiap worker menjalankan loop yang sama:
//! 1. Ambil completion dari queue dan jalankan
//! 2. Kalau queue kosong, coba jadi leader: lock `Poll` lalu poll events
//! 3. Kalau `Poll` sedang dipegang worker lain, block di job channel
//!
//! Event dari `Poll` me-resolve wait yang armed menjadi job di queue.

use std::collections::HashMap;
use std::io;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, TryLockError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use log::{debug, error, info};
use mio::{Events, Poll, Registry, Token, Waker};

use super::handle::{Handle, Readiness};
use super::lock;

const WAKER_TOKEN: Token = Token(usize::MAX);
const EVENTS_CAPACITY: usize = 1024;
// Batas atas blocking di poll / channel, supaya shutdown selalu terlihat
const POLL_TIMEOUT: Duration = Duration::from_millis(50);

pub(super) type Job = Box<dyn FnOnce() + Send + 'static>;
pub(super) type Continuation = Box<dyn FnOnce(Readiness) + Send + 'static>;

/// Readiness wait state per token
pub(super) enum Wait {
    Idle,
    Armed(Continuation),
    /// Event datang saat tidak ada wait yang armed
    Fired,
}

/// State yang di-share antara pool, handle dan semua worker
pub(super) struct Shared {
    poll: Mutex<Poll>,
    pub(super) registry: Registry,
    waker: Waker,
    // Unbounded MPMC: siapa saja push, worker mana saja pop
    jobs_tx: Sender<Job>,
    jobs_rx: Receiver<Job>,
    waits: Mutex<HashMap<Token, Wait>>,
    next_token: AtomicUsize,
    // Queued + running jobs + armed waits
    outstanding: AtomicUsize,
    keep_alive: AtomicBool,
    halted: AtomicBool,
}

impl Shared {
    fn new() -> io::Result<Self> {
        let poll = Poll::new()?;
        let registry = poll.registry().try_clone()?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)?;
        let (jobs_tx, jobs_rx) = crossbeam_channel::unbounded();

        Ok(Self {
            poll: Mutex::new(poll),
            registry,
            waker,
            jobs_tx,
            jobs_rx,
            waits: Mutex::new(HashMap::new()),
            next_token: AtomicUsize::new(1),
            outstanding: AtomicUsize::new(0),
            keep_alive: AtomicBool::new(true),
            halted: AtomicBool::new(false),
        })
    }

    pub(super) fn is_running(&self) -> bool {
        self.keep_alive.load(Ordering::SeqCst) && !self.halted.load(Ordering::SeqCst)
    }

    fn is_drained(&self) -> bool {
        self.halted.load(Ordering::SeqCst)
            || (!self.keep_alive.load(Ordering::SeqCst)
                && self.outstanding.load(Ordering::SeqCst) == 0)
    }

    /// Queue job; dihitung outstanding sampai selesai dijalankan.
    pub(super) fn schedule(&self, job: Job) {
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        // Receiver hidup selama Shared hidup, jadi send tidak bisa gagal di sini
        if self.jobs_tx.send(job).is_err() {
            error!("Job channel disconnected, dropping job");
            self.finish_one();
            return;
        }
        self.wake_poller();
    }

    fn pop_job(&self) -> Option<Job> {
        self.jobs_rx.try_recv().ok()
    }

    fn has_jobs(&self) -> bool {
        !self.jobs_rx.is_empty()
    }

    fn finish_one(&self) {
        let previous = self.outstanding.fetch_sub(1, Ordering::SeqCst);
        if previous == 1 && !self.keep_alive.load(Ordering::SeqCst) {
            self.wake_poller();
        }
    }

    fn wake_poller(&self) {
        if let Err(e) = self.waker.wake() {
            error!("Failed to wake reactor: {}", e);
        }
    }

    /// Follower: block di channel sampai ada job atau timeout.
    fn wait_for_job(&self, timeout: Duration) -> Option<Job> {
        if self.is_drained() {
            return None;
        }
        let job = self.jobs_rx.recv_timeout(timeout).ok()?;
        if self.halted.load(Ordering::SeqCst) {
            // Setelah halt job tidak dijalankan; sisa lain dibuang oleh clear()
            drop(job);
            self.finish_one();
            return None;
        }
        Some(job)
    }

    pub(super) fn allocate_token(&self) -> Token {
        let token = Token(self.next_token.fetch_add(1, Ordering::Relaxed));
        lock(&self.waits).insert(token, Wait::Idle);
        token
    }

    /// Suspend continuation sampai token ready atau di-cancel.
    ///
    /// Event yang sudah di-latch (`Fired`) langsung me-resolve continuation.
    pub(super) fn park(&self, token: Token, cont: Continuation) {
        let immediate = {
            let mut waits = lock(&self.waits);
            match waits.get_mut(&token) {
                Some(wait) => match mem::replace(wait, Wait::Idle) {
                    Wait::Idle => {
                        *wait = Wait::Armed(cont);
                        self.outstanding.fetch_add(1, Ordering::SeqCst);
                        None
                    }
                    Wait::Fired => Some((cont, Readiness::Ready)),
                    Wait::Armed(previous) => {
                        error!("Token {:?} parked twice, replacing previous wait", token);
                        *wait = Wait::Armed(cont);
                        drop(previous);
                        None
                    }
                },
                None => Some((cont, Readiness::Cancelled)),
            }
        };

        if let Some((cont, readiness)) = immediate {
            self.schedule(Box::new(move || cont(readiness)));
        }
    }

    /// Resolve wait yang armed. Returns `true` jika ada continuation yang
    /// di-schedule.
    pub(super) fn resolve(&self, token: Token, readiness: Readiness) -> bool {
        let cont = {
            let mut waits = lock(&self.waits);
            match waits.get_mut(&token) {
                Some(wait) if matches!(wait, Wait::Armed(_)) => {
                    match mem::replace(wait, Wait::Idle) {
                        Wait::Armed(cont) => Some(cont),
                        _ => None,
                    }
                }
                Some(wait) => {
                    if readiness == Readiness::Ready {
                        *wait = Wait::Fired;
                    }
                    None
                }
                None => None,
            }
        };

        match cont {
            Some(cont) => {
                self.schedule(Box::new(move || cont(readiness)));
                // Wait sudah jadi job; schedule di atas menjaga count > 0
                self.finish_one();
                true
            }
            None => false,
        }
    }

    pub(super) fn forget(&self, token: Token) {
        let removed = lock(&self.waits).remove(&token);
        if let Some(Wait::Armed(_)) = removed {
            self.finish_one();
        }
    }

    fn release_keep_alive(&self) {
        self.keep_alive.store(false, Ordering::SeqCst);
        self.wake_poller();
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        self.wake_poller();
    }

    /// Drop sisa jobs dan waits setelah semua worker keluar
    fn clear(&self) {
        let jobs: Vec<Job> = self.jobs_rx.try_iter().collect();
        let waits: Vec<Wait> = lock(&self.waits).drain().map(|(_, wait)| wait).collect();
        if !jobs.is_empty() || waits.iter().any(|w| matches!(w, Wait::Armed(_))) {
            debug!(
                "Discarding {} queued jobs and {} waits after shutdown",
                jobs.len(),
                waits.len()
            );
        }
    }
}

/// Fixed-size worker pool yang men-drive satu shared reactor.
///
/// Pool tetap hidup walau tidak ada pending work sampai `stop()` dipanggil.
pub struct EventLoopPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl EventLoopPool {
    /// Launch `workers` threads (minimal 1) yang semuanya drive reactor yang sama.
    pub fn start(workers: usize) -> io::Result<Self> {
        let shared = Arc::new(Shared::new()?);
        let count = workers.max(1);
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(count),
        };

        for index in 0..count {
            let worker_shared = Arc::clone(&pool.shared);
            let spawned = thread::Builder::new()
                .name(format!("courier-worker-{}", index))
                .spawn(move || worker_loop(worker_shared, index));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    pool.stop_now();
                    pool.join();
                    return Err(e);
                }
            }
        }

        info!("Event loop pool started with {} workers", count);
        Ok(pool)
    }

    pub fn handle(&self) -> Handle {
        Handle::new(Arc::clone(&self.shared))
    }

    /// Number of worker threads still owned by the pool.
    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Release keep-alive: worker keluar setelah semua pending work selesai.
    pub fn stop(&self) {
        self.shared.release_keep_alive();
    }

    /// Halt segera; completion yang pending tidak dijalankan.
    pub fn stop_now(&self) {
        self.shared.halt();
    }

    /// Block sampai semua worker keluar.
    pub fn join(&mut self) {
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("Worker thread panicked");
            }
        }
        self.shared.clear();
        debug!("Event loop pool joined");
    }
}

impl Drop for EventLoopPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop_now();
            self.join();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize) {
    debug!("Worker {} started", index);
    let mut events = Events::with_capacity(EVENTS_CAPACITY);

    loop {
        if shared.halted.load(Ordering::SeqCst) {
            break;
        }

        if let Some(job) = shared.pop_job() {
            run_job(&shared, job, index);
            continue;
        }

        if shared.is_drained() {
            break;
        }

        match shared.poll.try_lock() {
            Ok(mut poll) => {
                if shared.has_jobs() {
                    continue;
                }
                if let Err(e) = poll.poll(&mut events, Some(POLL_TIMEOUT)) {
                    if e.kind() != io::ErrorKind::Interrupted {
                        error!("Worker {}: poll failed: {}", index, e);
                    }
                    continue;
                }
                drop(poll);

                for event in events.iter() {
                    if event.token() != WAKER_TOKEN {
                        shared.resolve(event.token(), Readiness::Ready);
                    }
                }
            }
            Err(TryLockError::WouldBlock) => {
                if let Some(job) = shared.wait_for_job(POLL_TIMEOUT) {
                    run_job(&shared, job, index);
                }
            }
            Err(TryLockError::Poisoned(_)) => {
                error!("Worker {}: reactor lock poisoned, exiting", index);
                break;
            }
        }
    }

    debug!("Worker {} exiting", index);
}

fn run_job(shared: &Shared, job: Job, index: usize) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        error!("Worker {}: completion panicked", index);
    }
    shared.finish_one();
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_submitted_jobs_run_on_workers() {
        let mut pool = EventLoopPool::start(4).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();

        for i in 0..100 {
            let tx = tx.clone();
            handle.submit(move || tx.send(i).unwrap()).unwrap();
        }

        let mut seen: Vec<i32> = (0..100).map(|_| rx.recv().unwrap()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());

        pool.stop();
        pool.join();
        assert_eq!(pool.workers(), 0);
    }

    #[test]
    fn test_jobs_from_many_producers_run_once() {
        let mut pool = EventLoopPool::start(3).unwrap();
        let (tx, rx) = mpsc::channel();

        let producers: Vec<_> = (0..8)
            .map(|p| {
                let handle = pool.handle();
                let tx = tx.clone();
                thread::spawn(move || {
                    for i in 0..100 {
                        let tx = tx.clone();
                        handle.submit(move || tx.send(p * 100 + i).unwrap()).unwrap();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }

        pool.stop();
        pool.join();
        drop(tx);

        let mut seen: Vec<i32> = rx.iter().collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..800).collect::<Vec<_>>());
    }

    #[test]
    fn test_zero_workers_still_starts_one() {
        let mut pool = EventLoopPool::start(0).unwrap();
        assert_eq!(pool.workers(), 1);
        pool.stop();
        pool.join();
    }

    #[test]
    fn test_stop_drains_chained_work() {
        let mut pool = EventLoopPool::start(2).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();

        let chained = handle.clone();
        handle
            .submit(move || {
                thread::sleep(Duration::from_millis(50));
                // Continuation internal tetap jalan walau keep-alive sudah dilepas
                chained.spawn(move || tx.send("second").unwrap());
            })
            .unwrap();

        pool.stop();
        assert!(handle.submit(|| {}).is_err());
        pool.join();

        assert_eq!(rx.try_recv(), Ok("second"));
    }

    #[test]
    fn test_cancel_resolves_armed_wait() {
        let mut pool = EventLoopPool::start(2).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();

        let addr = "127.0.0.1:0".parse().unwrap();
        let mut listener = mio::net::TcpListener::bind(addr).unwrap();
        let token = handle
            .register(&mut listener, mio::Interest::READABLE)
            .unwrap();

        handle.park(token, move |readiness| tx.send(readiness).unwrap());
        assert!(handle.cancel(token));
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Readiness::Cancelled
        );

        // Tidak ada wait yang armed lagi
        assert!(!handle.cancel(token));

        handle.release(&mut listener, token);
        pool.stop();
        pool.join();
    }

    #[test]
    fn test_readiness_wakes_parked_continuation() {
        let mut pool = EventLoopPool::start(1).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();

        let addr = "127.0.0.1:0".parse().unwrap();
        let mut listener = mio::net::TcpListener::bind(addr).unwrap();
        let local = listener.local_addr().unwrap();
        let token = handle
            .register(&mut listener, mio::Interest::READABLE)
            .unwrap();

        handle.park(token, move |readiness| tx.send(readiness).unwrap());
        let _peer = std::net::TcpStream::connect(local).unwrap();

        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Readiness::Ready
        );

        handle.release(&mut listener, token);
        pool.stop();
        pool.join();
    }

    #[test]
    fn test_park_on_released_token_is_cancelled() {
        let mut pool = EventLoopPool::start(1).unwrap();
        let handle = pool.handle();
        let (tx, rx) = mpsc::channel();

        handle.park(Token(424242), move |readiness| tx.send(readiness).unwrap());
        assert_eq!(
            rx.recv_timeout(Duration::from_secs(5)).unwrap(),
            Readiness::Cancelled
        );

        pool.stop();
        pool.join();
    }

    #[test]
    fn test_stop_now_skips_pending_waits() {
        let mut pool = EventLoopPool::start(2).unwrap();
        let handle = pool.handle();

        let addr = "127.0.0.1:0".parse().unwrap();
        let mut listener = mio::net::TcpListener::bind(addr).unwrap();
        let token = handle
            .register(&mut listener, mio::Interest::READABLE)
            .unwrap();
        handle.park(token, |_| panic!("must not run after halt"));

        pool.stop_now();
        pool.join();
        assert!(!handle.is_running());
    }
}
