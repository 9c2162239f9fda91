//! The server engine. One reactor thread (the thread that calls
//! [`Server::start`]) runs the `epoll_wait` loop; `threads - 1` worker
//! threads pull dispatched readiness events off a channel and do the
//! actual socket I/O and evaluator work, then hand a re-arm request back
//! to the reactor thread via a second channel and a [`Waker`].

use std::io;
use std::net::SocketAddrV4;
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};

use crate::config::Config;
use crate::error::StartError;
use crate::net::TcpListener;
use crate::reactor::{Events, Interest, Poll, Token};
use crate::session::{Next, Phase, Slot};

type TcpSlot = Slot<crate::net::TcpStream>;

const LISTENER: Token = Token(usize::MAX - 1);
const WAKER_TOKEN: Token = Token(usize::MAX - 2);

#[derive(Debug, Clone, Copy)]
enum Readiness {
    Readable,
    Writable,
}

struct WorkItem {
    index: usize,
    readiness: Readiness,
}

struct RearmItem {
    index: usize,
    next: Next,
}

/// Owns the listener, the fixed slot pool, and the worker pool for the
/// lifetime of one `start()` call.
pub struct Server {
    config: Config,
    poll: Poll,
    waker: Arc<crate::reactor::Waker>,
    running: Arc<AtomicBool>,
}

impl Server {
    pub fn new(config: Config) -> Result<Server, StartError> {
        let poll = Poll::new().map_err(StartError::Reactor)?;
        let waker = crate::reactor::Waker::new(&poll.registry(), WAKER_TOKEN)
            .map_err(StartError::Reactor)?;
        Ok(Server {
            config,
            poll,
            waker: Arc::new(waker),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Flip the running flag and interrupt a blocked `epoll_wait`. Safe
    /// to call from any thread, including a signal handler's dedicated
    /// watcher thread (see `main.rs`).
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let _ = self.waker.wake();
    }

    /// Bind the listener, create the slot pool, spawn `threads - 1`
    /// workers, and run the reactor loop on the calling thread until
    /// `stop()` is called. Blocks until teardown completes.
    pub fn start(&self) -> Result<(), StartError> {
        let addr = SocketAddrV4::new(self.config.address, self.config.port);
        let listener = TcpListener::bind(addr).map_err(|source| StartError::Bind { addr, source })?;
        let registry = self.poll.registry();
        registry
            .register(listener.as_raw_fd(), LISTENER, Interest::READABLE)
            .map_err(StartError::Reactor)?;

        let slots: Arc<Vec<Mutex<TcpSlot>>> = Arc::new(
            (0..self.config.clients as i32)
                .map(Slot::new)
                .map(Mutex::new)
                .collect(),
        );

        let (work_tx, work_rx) = mpsc::channel::<WorkItem>();
        let work_rx = Arc::new(Mutex::new(work_rx));
        let (rearm_tx, rearm_rx) = mpsc::channel::<RearmItem>();

        let worker_count = self.config.threads.saturating_sub(1);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let slots = Arc::clone(&slots);
            let work_rx = Arc::clone(&work_rx);
            let rearm_tx = rearm_tx.clone();
            let waker = Arc::clone(&self.waker);
            let handle = thread::Builder::new()
                .spawn(move || worker_loop(slots, work_rx, rearm_tx, waker))
                .map_err(StartError::ThreadSpawn)?;
            workers.push(handle);
        }
        drop(rearm_tx);

        log::info!(
            "calcd listening on {addr} with {} slots and {} worker threads",
            self.config.clients,
            worker_count
        );

        let mut events = Events::with_capacity(1024);
        while self.running.load(Ordering::SeqCst) {
            if let Err(e) = self.poll.poll(&mut events, None) {
                if e.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(StartError::Reactor(e));
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER => accept_loop(&listener, &registry, &slots),
                    WAKER_TOKEN => {
                        let _ = self.waker.ack();
                    }
                    Token(index) => {
                        let fd = slots[index].lock().unwrap().as_raw_fd();
                        if let Some(fd) = fd {
                            let _ = registry.deregister(fd);
                        }
                        let readiness = if event.is_readable() {
                            Readiness::Readable
                        } else {
                            Readiness::Writable
                        };
                        let _ = work_tx.send(WorkItem { index, readiness });
                    }
                }
            }

            while let Ok(item) = rearm_rx.try_recv() {
                apply_rearm(&registry, &slots, &listener, item);
            }
        }

        for handle in workers {
            let _ = handle.join();
        }
        close_all_slots(&slots);
        let _ = registry.deregister(listener.as_raw_fd());
        log::info!("calcd stopped");
        Ok(())
    }
}

fn worker_loop(
    slots: Arc<Vec<Mutex<TcpSlot>>>,
    work_rx: Arc<Mutex<mpsc::Receiver<WorkItem>>>,
    rearm_tx: mpsc::Sender<RearmItem>,
    waker: Arc<crate::reactor::Waker>,
) {
    loop {
        let item = {
            let rx = work_rx.lock().unwrap();
            rx.recv()
        };
        let item = match item {
            Ok(item) => item,
            Err(_) => break,
        };

        let next = {
            let mut slot = slots[item.index].lock().unwrap();
            let result = match item.readiness {
                Readiness::Readable => slot.handle_readable(),
                Readiness::Writable => slot.handle_writable(),
            };
            result.unwrap_or(Next::Close)
        };

        let _ = rearm_tx.send(RearmItem {
            index: item.index,
            next,
        });
        let _ = waker.wake();
    }
}

fn apply_rearm(
    registry: &crate::reactor::Registry,
    slots: &Arc<Vec<Mutex<TcpSlot>>>,
    listener: &TcpListener,
    item: RearmItem,
) {
    match item.next {
        Next::AwaitReadable => {
            if let Some(fd) = slots[item.index].lock().unwrap().as_raw_fd() {
                let _ = registry.register(fd, Token(item.index), Interest::READABLE);
            }
        }
        Next::AwaitWritable => {
            if let Some(fd) = slots[item.index].lock().unwrap().as_raw_fd() {
                let _ = registry.register(fd, Token(item.index), Interest::WRITABLE);
            }
        }
        Next::Close => {
            // The slot is idle again (Accepting); give it a chance to pick
            // up anything still waiting in the listen backlog.
            accept_loop(listener, registry, slots);
        }
    }
}

fn accept_loop(
    listener: &TcpListener,
    registry: &crate::reactor::Registry,
    slots: &Arc<Vec<Mutex<TcpSlot>>>,
) {
    loop {
        // `clients` sessions are already admitted: with no free slot,
        // stop pulling connections off the listener entirely so further
        // clients wait in the OS listen backlog rather than being
        // accepted only to be dropped.
        let Some(index) = find_free_slot(slots) else {
            break;
        };
        match listener.accept() {
            Ok((stream, _peer)) => {
                let _ = stream.set_nodelay(true);
                let fd = stream.as_raw_fd();
                {
                    let mut slot = slots[index].lock().unwrap();
                    slot.bind(stream);
                }
                if registry.register(fd, Token(index), Interest::READABLE).is_err() {
                    let mut slot = slots[index].lock().unwrap();
                    *slot = Slot::new(index as i32);
                }
            }
            Err(ref e) if would_block(e) => break,
            Err(e) => {
                log::warn!("accept error: {e}");
                break;
            }
        }
    }
}

fn find_free_slot(slots: &Arc<Vec<Mutex<TcpSlot>>>) -> Option<usize> {
    slots.iter().position(|slot| {
        let slot = slot.lock().unwrap();
        slot.phase() == Phase::Accepting && slot.as_raw_fd().is_none()
    })
}

fn close_all_slots(slots: &Arc<Vec<Mutex<TcpSlot>>>) {
    for slot in slots.iter() {
        let mut slot = slot.lock().unwrap();
        if slot.as_raw_fd().is_some() {
            *slot = Slot::new(slot.index);
        }
    }
}

#[inline]
fn would_block(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::WouldBlock
}
