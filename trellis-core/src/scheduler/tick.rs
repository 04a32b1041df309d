//! Tick Queue
//!
//! Deferred callbacks wait here until the next tick. A tick drains every
//! callback queued so far; callbacks queued while a tick is draining run in
//! the following tick.
//!
//! Nothing drains the queue on its own. Either call [`flush_ticks`], or
//! install a driver that is handed one drain job per tick. The tokio driver
//! spawns that job as a local task, which makes [`tick`] usable from async
//! code running inside a `LocalSet`.

use std::cell::RefCell;
use std::rc::Rc;

/// A function that arranges for a drain job to run soon.
pub type Driver = Rc<dyn Fn(Box<dyn FnOnce()>)>;

#[derive(Default)]
struct TickQueue {
    callbacks: Vec<Box<dyn FnOnce()>>,
    /// A drain job has been handed to the driver and has not run yet.
    pending: bool,
    driver: Option<Driver>,
}

thread_local! {
    static TICKS: RefCell<TickQueue> = RefCell::new(TickQueue::default());
}

/// Run `callback` on the next tick.
pub fn next_tick(callback: impl FnOnce() + 'static) {
    let driver = TICKS.with(|ticks| {
        let mut ticks = ticks.borrow_mut();
        ticks.callbacks.push(Box::new(callback));
        claim_drain(&mut ticks)
    });

    if let Some(driver) = driver {
        driver(Box::new(drain_once));
    }
}

/// Mark a drain as scheduled and return the driver to schedule it with.
fn claim_drain(ticks: &mut TickQueue) -> Option<Driver> {
    if ticks.pending || ticks.callbacks.is_empty() {
        return None;
    }
    let driver = ticks.driver.clone()?;
    ticks.pending = true;
    Some(driver)
}

fn drain_once() {
    run_tick();
}

/// Run the callbacks queued so far. Returns how many ran.
fn run_tick() -> usize {
    let callbacks = TICKS.with(|ticks| {
        let mut ticks = ticks.borrow_mut();
        ticks.pending = false;
        std::mem::take(&mut ticks.callbacks)
    });

    let count = callbacks.len();
    for callback in callbacks {
        callback();
    }
    count
}

/// Drain the tick queue until it stays empty. Returns the number of
/// callbacks run.
pub fn flush_ticks() -> usize {
    let mut total = 0;
    loop {
        let count = run_tick();
        if count == 0 {
            break;
        }
        total += count;
    }
    total
}

/// Check whether callbacks are waiting for a tick.
pub fn has_pending_ticks() -> bool {
    TICKS.with(|ticks| !ticks.borrow().callbacks.is_empty())
}

/// Restores the previous driver when dropped.
pub struct DriverGuard {
    previous: Option<Driver>,
}

impl Drop for DriverGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        let _ = TICKS.try_with(|ticks| {
            let mut ticks = ticks.borrow_mut();
            ticks.driver = previous;
            ticks.pending = false;
        });
    }
}

/// Install a driver for the current thread.
///
/// If callbacks are already waiting, the new driver is handed a drain job
/// straight away.
pub fn install_driver<F>(driver: F) -> DriverGuard
where
    F: Fn(Box<dyn FnOnce()>) + 'static,
{
    let (previous, kick) = TICKS.with(|ticks| {
        let mut ticks = ticks.borrow_mut();
        let previous = ticks.driver.replace(Rc::new(driver));
        ticks.pending = false;
        (previous, claim_drain(&mut ticks))
    });

    if let Some(driver) = kick {
        driver(Box::new(drain_once));
    }

    DriverGuard { previous }
}

/// Drive ticks with tokio local tasks.
///
/// # Panics
///
/// Scheduling a tick panics if the current task is not running inside a
/// `tokio::task::LocalSet`.
pub fn install_tokio_driver() -> DriverGuard {
    install_driver(|drain| {
        tokio::task::spawn_local(async move { drain() });
    })
}

/// Resolve once the tick queue has drained past this point.
///
/// Without a driver this waits until somebody calls [`flush_ticks`].
pub async fn tick() {
    let (tx, rx) = tokio::sync::oneshot::channel();
    next_tick(move || {
        let _ = tx.send(());
    });
    let _ = rx.await;
}
