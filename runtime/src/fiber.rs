// fiber.rs — Cooperative fiber runtime
//
// A fiber runs a parser thunk so it can suspend anywhere in its call stack
// when input runs short and be resumed later. Each fiber owns a dedicated
// OS thread with a fixed-size stack running a trampoline loop; the host and
// the fiber rendezvous over channels so exactly one side executes at a
// time. Through recycling, one trampoline serves an arbitrary number of
// user jobs.
//
// Abort unwinds the fiber's stack with an internal panic payload that the
// trampoline catches, so scope cleanup (`Drop`) runs exactly once and the
// signal never reaches user code. Errors returned by the thunk are captured
// and re-raised when the wrapping `Resumable` observes completion.
//
// Preconditions: single-threaded cooperative use per fiber; the host drives
//   run/resume/abort strictly by the state machine below.
// Postconditions: state transitions follow
//   Init → Running → {Yielded → Running ..., Finished}; abort on a Yielded
//   fiber runs its unwind path and lands in Finished.
// Failure modes: state-machine misuse is an internal error.
// Side effects: process-wide statistics counters; a per-thread fiber cache.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, Once};
use std::thread;

use once_cell::sync::Lazy;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{internal_error, Error, RuntimeError};
use crate::rt_debug;

// ── Configuration ────────────────────────────────────────────────────────

/// Stack size of each fiber thread.
pub const STACK_SIZE: usize = 1024 * 1024;

/// Maximum number of finished fibers retained per thread for reuse.
pub const CACHE_SIZE: usize = 100;

/// Remaining-stack threshold below which `check_stack` reports exhaustion.
const STACK_SAFETY_MARGIN: usize = 64 * 1024;

// ── Payload types ────────────────────────────────────────────────────────

/// Opaque result produced by a fiber's thunk.
pub type Value = Box<dyn Any + Send>;

/// A job to run inside a fiber.
pub type Thunk = Box<dyn FnOnce() -> Result<Value, Error> + Send>;

/// Panic payload used internally to unwind an aborted fiber.
struct AbortSignal;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Init,
    Running,
    Yielded,
    Idle,
    Aborting,
    Finished,
}

/// What a finished fiber produced.
pub enum Outcome {
    Completed(Result<Value, Error>),
    Aborted,
}

enum Cmd {
    Job(Thunk),
    Resume,
    Abort,
    Shutdown,
}

enum Event {
    Yielded,
    Finished(Outcome),
}

// ── Statistics ───────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Counters {
    total: u64,
    current: u64,
    max: u64,
    initialized: u64,
}

// One lock so that `current <= max <= total` holds for every snapshot.
static COUNTERS: Lazy<Mutex<Counters>> = Lazy::new(|| Mutex::new(Counters::default()));

/// Per-process fiber statistics. `cached` counts the calling thread's cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub total: u64,
    pub current: u64,
    pub cached: u64,
    pub max: u64,
    pub initialized: u64,
}

pub fn statistics() -> Statistics {
    let c = COUNTERS.lock().unwrap();
    Statistics {
        total: c.total,
        current: c.current,
        cached: CACHE.with(|cache| cache.borrow().len() as u64),
        max: c.max,
        initialized: c.initialized,
    }
}

// ── Fiber-thread context ─────────────────────────────────────────────────

struct TlsCtx {
    cmd_rx: Receiver<Cmd>,
    event_tx: Sender<Event>,
    stack_bottom: usize,
}

thread_local! {
    static FIBER_TLS: RefCell<Option<TlsCtx>> = const { RefCell::new(None) };
    static UNWINDING_FOR_ABORT: Cell<bool> = const { Cell::new(false) };
}

static HOOK_INIT: Once = Once::new();

// The default panic hook would print a backtrace for every abort unwind;
// silence it for our own signal only.
fn install_quiet_abort_hook() {
    HOOK_INIT.call_once(|| {
        let prev = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !UNWINDING_FOR_ABORT.with(|c| c.get()) {
                prev(info);
            }
        }));
    });
}

/// Suspend the current fiber, returning control to the host. Retried
/// operations call this transparently; generated code never sees it.
///
/// Calling from outside a fiber is a runtime error.
pub fn yield_now() -> Result<(), RuntimeError> {
    enum Next {
        Resumed,
        Aborting,
        Gone,
    }

    let next = FIBER_TLS.with(|tls| {
        let borrow = tls.borrow();
        let Some(ctx) = borrow.as_ref() else {
            return Err(RuntimeError::YieldOutsideFiber);
        };
        if ctx.event_tx.send(Event::Yielded).is_err() {
            return Ok(Next::Gone);
        }
        match ctx.cmd_rx.recv() {
            Ok(Cmd::Resume) => Ok(Next::Resumed),
            Ok(Cmd::Abort) => Ok(Next::Aborting),
            Ok(Cmd::Shutdown) | Err(_) => Ok(Next::Gone),
            Ok(Cmd::Job(_)) => internal_error("fiber: job delivered to yielded fiber"),
        }
    })?;

    match next {
        Next::Resumed => Ok(()),
        Next::Aborting | Next::Gone => {
            UNWINDING_FOR_ABORT.with(|c| c.set(true));
            panic::panic_any(AbortSignal);
        }
    }
}

/// Check that the current fiber still has headroom on its stack; raise
/// "stack size exceeded" once the safety margin is gone. Called from
/// generated code at function entry. A no-op outside fibers.
pub fn check_stack() -> Result<(), RuntimeError> {
    let marker: u8 = 0;
    let here = &marker as *const u8 as usize;
    FIBER_TLS.with(|tls| {
        if let Some(ctx) = tls.borrow().as_ref() {
            let used = ctx.stack_bottom.saturating_sub(here);
            if STACK_SIZE.saturating_sub(used) < STACK_SAFETY_MARGIN {
                return Err(RuntimeError::StackExceeded);
            }
        }
        Ok(())
    })
}

// ── Trampoline ───────────────────────────────────────────────────────────

fn trampoline(cmd_rx: Receiver<Cmd>, event_tx: Sender<Event>) {
    let stack_marker: u8 = 0;
    let bottom = &stack_marker as *const u8 as usize;
    FIBER_TLS.with(|tls| {
        *tls.borrow_mut() = Some(TlsCtx {
            cmd_rx: cmd_rx.clone(),
            event_tx: event_tx.clone(),
            stack_bottom: bottom,
        });
    });
    COUNTERS.lock().unwrap().initialized += 1;
    rt_debug!("fibers", "entering trampoline loop");

    loop {
        match cmd_rx.recv() {
            Ok(Cmd::Job(thunk)) => {
                let result = panic::catch_unwind(AssertUnwindSafe(thunk));
                let outcome = match result {
                    Ok(r) => Outcome::Completed(r),
                    Err(payload) => {
                        if payload.downcast_ref::<AbortSignal>().is_some() {
                            UNWINDING_FOR_ABORT.with(|c| c.set(false));
                            Outcome::Aborted
                        } else {
                            let msg = payload
                                .downcast_ref::<&str>()
                                .map(|s| s.to_string())
                                .or_else(|| payload.downcast_ref::<String>().cloned())
                                .unwrap_or_else(|| "fiber panicked".to_string());
                            Outcome::Completed(Err(Error::Internal(msg)))
                        }
                    }
                };
                if event_tx.send(Event::Finished(outcome)).is_err() {
                    break;
                }
            }
            Ok(Cmd::Resume) | Ok(Cmd::Abort) => {
                internal_error("fiber: resume/abort delivered to idle trampoline")
            }
            Ok(Cmd::Shutdown) | Err(_) => break,
        }
    }
    rt_debug!("fibers", "finished trampoline loop");
}

// ── Fiber ────────────────────────────────────────────────────────────────

/// A single fiber. Obtain through `create()` (which recycles from the
/// per-thread cache), arm with `init()`, then drive with `run`/`resume`/
/// `abort`. Return through `destroy()` for reuse.
pub struct Fiber {
    state: State,
    cmd_tx: Sender<Cmd>,
    event_rx: Receiver<Event>,
    pending: Option<Thunk>,
    outcome: Option<Outcome>,
    thread: Option<thread::JoinHandle<()>>,
}

impl Fiber {
    fn new() -> Self {
        install_quiet_abort_hook();
        let (cmd_tx, cmd_rx) = bounded::<Cmd>(1);
        let (event_tx, event_rx) = bounded::<Event>(1);
        let thread = thread::Builder::new()
            .name("spicy-fiber".into())
            .stack_size(STACK_SIZE)
            .spawn(move || trampoline(cmd_rx, event_tx))
            .unwrap_or_else(|e| internal_error(&format!("fiber: spawn failed: {e}")));

        {
            let mut c = COUNTERS.lock().unwrap();
            c.total += 1;
            c.current += 1;
            c.max = c.max.max(c.current);
        }
        rt_debug!("fibers", "allocated new fiber");

        Self {
            state: State::Init,
            cmd_tx,
            event_rx,
            pending: None,
            outcome: None,
            thread: Some(thread),
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Arm the fiber with a new job. Valid on a fresh or recycled fiber.
    pub fn init(&mut self, thunk: Thunk) {
        match self.state {
            State::Init | State::Idle | State::Finished => {}
            _ => internal_error("fiber: init on active fiber"),
        }
        self.pending = Some(thunk);
        self.outcome = None;
        self.state = State::Init;
    }

    /// Start or continue the fiber. Valid in `Init` (first run) and
    /// `Yielded` (resume). Returns once the fiber yields or finishes.
    pub fn run(&mut self) {
        let cmd = match self.state {
            State::Init => {
                let thunk = self
                    .pending
                    .take()
                    .unwrap_or_else(|| internal_error("fiber: run without init"));
                Cmd::Job(thunk)
            }
            State::Yielded => Cmd::Resume,
            _ => internal_error("fiber: run in invalid state"),
        };
        self.state = State::Running;
        self.dispatch(cmd);
    }

    /// Equivalent to `run()` on a `Yielded` fiber.
    pub fn resume(&mut self) {
        if self.state != State::Yielded {
            internal_error("fiber: resume on non-yielded fiber");
        }
        self.run();
    }

    /// Cancel a yielded fiber. Its stack unwinds (scope cleanup runs) and
    /// the fiber finishes without a result.
    pub fn abort(&mut self) {
        if self.state != State::Yielded {
            internal_error("fiber: abort on non-yielded fiber");
        }
        self.state = State::Aborting;
        self.dispatch(Cmd::Abort);
    }

    fn dispatch(&mut self, cmd: Cmd) {
        if self.cmd_tx.send(cmd).is_err() {
            internal_error("fiber: thread gone");
        }
        match self.event_rx.recv() {
            Ok(Event::Yielded) => self.state = State::Yielded,
            Ok(Event::Finished(outcome)) => {
                self.state = State::Finished;
                self.outcome = Some(outcome);
            }
            Err(_) => internal_error("fiber: thread gone"),
        }
    }

    /// The finished fiber's outcome; `None` until `Finished`.
    pub fn take_outcome(&mut self) -> Option<Outcome> {
        self.outcome.take()
    }
}

impl Drop for Fiber {
    fn drop(&mut self) {
        if self.state == State::Yielded {
            self.abort();
        }
        let _ = self.cmd_tx.send(Cmd::Shutdown);
        {
            let mut c = COUNTERS.lock().unwrap();
            c.current = c.current.saturating_sub(1);
        }
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
        rt_debug!("fibers", "deleted fiber");
    }
}

// ── Reuse cache ──────────────────────────────────────────────────────────

thread_local! {
    static CACHE: RefCell<Vec<Fiber>> = const { RefCell::new(Vec::new()) };
}

/// Obtain a fiber, reusing a cached one when available.
pub fn create() -> Fiber {
    if let Some(f) = CACHE.with(|c| c.borrow_mut().pop()) {
        rt_debug!("fibers", "reusing fiber from cache");
        return f;
    }
    Fiber::new()
}

/// Retire a fiber, keeping it for reuse while the cache has room.
pub fn destroy(mut f: Fiber) {
    if f.state == State::Yielded {
        f.abort();
    }
    f.state = State::Idle;
    f.pending = None;
    f.outcome = None;
    CACHE.with(|c| {
        let mut cache = c.borrow_mut();
        if cache.len() < CACHE_SIZE {
            rt_debug!("fibers", "putting fiber back into cache");
            cache.push(f);
        } else {
            rt_debug!("fibers", "cache size exceeded, deleting finished fiber");
        }
    });
}

/// Warm the cache up to its capacity.
pub fn prime_cache() {
    let mut fibers = Vec::with_capacity(CACHE_SIZE);
    for _ in 0..CACHE_SIZE {
        fibers.push(create());
    }
    while let Some(f) = fibers.pop() {
        destroy(f);
    }
}

/// Drop the calling thread's cache and zero the statistics. Test helper.
pub fn reset() {
    CACHE.with(|c| c.borrow_mut().clear());
    *COUNTERS.lock().unwrap() = Counters::default();
}

// ── Resumable ────────────────────────────────────────────────────────────

enum Completion {
    Value(Value),
    Empty,
}

/// Host-facing handle on a fiber-backed computation. Incomplete until the
/// thunk returns or the fiber is aborted; errors captured inside the fiber
/// re-raise on the host side at the observing call.
pub struct Resumable {
    fiber: Option<Fiber>,
    completion: Option<Completion>,
}

impl Resumable {
    pub fn new<F, T>(f: F) -> Self
    where
        F: FnOnce() -> Result<T, Error> + Send + 'static,
        T: Send + 'static,
    {
        let mut fiber = create();
        fiber.init(Box::new(move || f().map(|v| Box::new(v) as Value)));
        Self {
            fiber: Some(fiber),
            completion: None,
        }
    }

    /// Start the computation. Returns `Ok` whether the fiber yielded or
    /// finished; check `completed()`.
    pub fn run(&mut self) -> Result<(), Error> {
        let fiber = self
            .fiber
            .as_mut()
            .unwrap_or_else(|| internal_error("resumable: run after completion"));
        fiber.run();
        self.observe()
    }

    /// Continue after a yield.
    pub fn resume(&mut self) -> Result<(), Error> {
        let fiber = self
            .fiber
            .as_mut()
            .unwrap_or_else(|| internal_error("resumable: resume after completion"));
        fiber.resume();
        self.observe()
    }

    /// Cancel the computation; the fiber's stack unwinds. Marks the
    /// resumable complete without a value.
    pub fn abort(&mut self) {
        let Some(mut fiber) = self.fiber.take() else {
            return;
        };
        if fiber.state() == State::Yielded {
            fiber.abort();
        }
        fiber.take_outcome();
        destroy(fiber);
        self.completion = Some(Completion::Empty);
    }

    fn observe(&mut self) -> Result<(), Error> {
        let finished = matches!(self.fiber.as_ref().map(Fiber::state), Some(State::Finished));
        if !finished {
            return Ok(());
        }
        let mut fiber = self.fiber.take().unwrap();
        let outcome = fiber
            .take_outcome()
            .unwrap_or_else(|| internal_error("resumable: finished without outcome"));
        destroy(fiber);
        match outcome {
            Outcome::Completed(Ok(value)) => {
                self.completion = Some(Completion::Value(value));
                Ok(())
            }
            Outcome::Completed(Err(e)) => {
                rt_debug!("fibers", "rethrowing error after fiber finished: {e}");
                self.completion = Some(Completion::Empty);
                if crate::error::abort_on_error() {
                    eprintln!("spicy-rt: aborting on error: {e}");
                    std::process::abort();
                }
                Err(e)
            }
            Outcome::Aborted => {
                self.completion = Some(Completion::Empty);
                Ok(())
            }
        }
    }

    pub fn completed(&self) -> bool {
        self.completion.is_some()
    }

    /// The thunk's result, if it completed with a value of type `T`.
    pub fn get<T: 'static>(&mut self) -> Option<T> {
        match self.completion.take() {
            Some(Completion::Value(v)) => match v.downcast::<T>() {
                Ok(b) => Some(*b),
                Err(v) => {
                    self.completion = Some(Completion::Value(v));
                    None
                }
            },
            Some(Completion::Empty) => {
                self.completion = Some(Completion::Empty);
                None
            }
            None => None,
        }
    }
}

impl Drop for Resumable {
    fn drop(&mut self) {
        self.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn log_push(log: &Arc<Mutex<Vec<String>>>, entry: &str) {
        log.lock().unwrap().push(entry.to_string());
    }

    struct ScopeProbe {
        log: Arc<Mutex<Vec<String>>>,
    }

    impl ScopeProbe {
        fn new(log: Arc<Mutex<Vec<String>>>) -> Self {
            log_push(&log, "ctor");
            Self { log }
        }
    }

    impl Drop for ScopeProbe {
        fn drop(&mut self) {
            log_push(&self.log, "dtor");
        }
    }

    #[test]
    fn yield_resume_sequence() {
        let acc = Arc::new(Mutex::new(String::new()));
        let log = Arc::new(Mutex::new(Vec::new()));
        let (acc2, log2) = (acc.clone(), log.clone());

        let mut r = Resumable::new(move || {
            let _probe = ScopeProbe::new(log2);
            acc2.lock().unwrap().push('A');
            yield_now()?;
            acc2.lock().unwrap().push('B');
            yield_now()?;
            acc2.lock().unwrap().push('C');
            Ok(42u32)
        });

        r.run().unwrap();
        assert_eq!(*acc.lock().unwrap(), "A");
        assert!(!r.completed());

        r.resume().unwrap();
        assert_eq!(*acc.lock().unwrap(), "AB");
        assert!(!r.completed());

        r.resume().unwrap();
        assert_eq!(*acc.lock().unwrap(), "ABC");
        assert!(r.completed());
        assert_eq!(r.get::<u32>(), Some(42));

        assert_eq!(*log.lock().unwrap(), vec!["ctor", "dtor"]);
    }

    #[test]
    fn error_rethrown_on_resume() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();

        let mut r = Resumable::new(move || -> Result<(), Error> {
            let _probe = ScopeProbe::new(log2);
            yield_now()?;
            Err(RuntimeError::UnsetOptional.into())
        });

        r.run().unwrap();
        assert!(!r.completed());

        let err = r.resume().unwrap_err();
        assert!(matches!(err, Error::Runtime(RuntimeError::UnsetOptional)));
        assert!(r.completed());
        assert_eq!(*log.lock().unwrap(), vec!["ctor", "dtor"]);
    }

    #[test]
    fn abort_runs_scope_cleanup_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log2 = log.clone();

        let mut r = Resumable::new(move || -> Result<(), Error> {
            let _probe = ScopeProbe::new(log2);
            yield_now()?;
            yield_now()?;
            Ok(())
        });

        r.run().unwrap();
        r.abort();
        assert!(r.completed());
        assert_eq!(r.get::<()>(), None);
        assert_eq!(*log.lock().unwrap(), vec!["ctor", "dtor"]);
    }

    #[test]
    fn yield_outside_fiber_is_an_error() {
        assert_eq!(yield_now(), Err(RuntimeError::YieldOutsideFiber));
    }

    #[test]
    fn cached_fiber_is_reused() {
        let mut r = Resumable::new(|| Ok(1u8));
        r.run().unwrap();
        assert_eq!(r.get::<u8>(), Some(1));

        // The finished fiber went back to this thread's cache.
        let cached = statistics().cached;
        assert!(cached >= 1);

        // A new resumable pops it instead of allocating. The cache is
        // thread-local, so this observation is deterministic.
        let mut r2 = Resumable::new(|| Ok(2u8));
        assert_eq!(statistics().cached, cached - 1);
        r2.run().unwrap();
        assert_eq!(r2.get::<u8>(), Some(2));
        assert_eq!(statistics().cached, cached);
    }

    #[test]
    fn statistics_invariants_hold() {
        let mut handles = Vec::new();
        for i in 0..5u8 {
            let mut r = Resumable::new(move || {
                yield_now()?;
                Ok(i)
            });
            r.run().unwrap();
            handles.push(r);
        }
        let stats = statistics();
        assert!(stats.current <= stats.max);
        assert!(stats.max <= stats.total);
        assert!(stats.cached <= stats.current);

        for mut r in handles {
            r.resume().unwrap();
            assert!(r.completed());
        }
    }

    #[test]
    fn check_stack_ok_near_top() {
        let mut r = Resumable::new(|| {
            check_stack()?;
            Ok(())
        });
        r.run().unwrap();
        assert!(r.completed());
    }

    #[test]
    fn stray_panic_is_captured_as_internal_error() {
        let mut r = Resumable::new(|| -> Result<(), Error> {
            panic!("boom");
        });
        let err = r.run().unwrap_err();
        assert!(matches!(err, Error::Internal(msg) if msg.contains("boom")));
    }
}
