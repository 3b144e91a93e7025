//! Scaled virtual time driver for embassy.
//!
//! Registers the process-wide `embassy_time_driver::Driver` with a virtual
//! clock that runs at a configurable multiple of host time. A forty-minute
//! TDMA soak then finishes in seconds of wall time while every protocol
//! constant keeps its real microsecond value; nothing in the core knows the
//! clock is scaled.
//!
//! The scale is normally set once at startup from the scenario file, but
//! changing it later is safe: only the real-time origin is rebased, the
//! virtual origin stays fixed, so queued deadlines never jump into the past.
//! All state sits behind one mutex; the wake thread slices its waits so a
//! scale change takes effect within a bounded delay even without a notify.

use core::task::Waker;
use embassy_time_driver::{Driver, TICK_HZ, time_driver_impl};
use std::collections::BTreeMap;
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::{Duration, Instant as StdInstant};

// Q32.32 fixed point; 1.0 == 1 << 32. Integer math end to end so repeated
// set/get of the same percent is exact.
const ONE_Q32: u64 = 1u64 << 32;

/// Upper bound on one wake-thread wait, so scale changes are picked up
/// promptly even if a notification is lost.
const MAX_WAIT_SLICE: Duration = Duration::from_millis(25);

struct DriverState {
    /// Host instant corresponding to `origin_virtual_ticks`.
    origin_real: StdInstant,
    /// Virtual origin in embassy ticks; never moves on rebase.
    origin_virtual_ticks: u64,
    /// virtual_dt = real_dt * scale_q32 / ONE_Q32.
    scale_q32: u64,
    /// Exact percent last set, echoed back without float round-off.
    percent: u32,
    /// Pending wakeups keyed by virtual tick.
    queue: BTreeMap<u64, Vec<Waker>>,
    wake_thread_started: bool,
}

static STATE: OnceLock<Mutex<DriverState>> = OnceLock::new();
static WAKEUP: Condvar = Condvar::new();

fn state() -> &'static Mutex<DriverState> {
    STATE.get_or_init(|| {
        Mutex::new(DriverState {
            origin_real: StdInstant::now(),
            origin_virtual_ticks: 0,
            scale_q32: ONE_Q32,
            percent: 100,
            queue: BTreeMap::new(),
            wake_thread_started: false,
        })
    })
}

fn real_to_virtual(s: &DriverState, real: StdInstant) -> u64 {
    let real_dt = real.saturating_duration_since(s.origin_real);
    let real_ticks = (real_dt.as_nanos() * TICK_HZ as u128 / 1_000_000_000) as u64;
    let scaled = (real_ticks as u128 * s.scale_q32 as u128 / ONE_Q32 as u128) as u64;
    s.origin_virtual_ticks.wrapping_add(scaled)
}

fn virtual_to_real(s: &DriverState, target_ticks: u64) -> StdInstant {
    // A target at or before the virtual origin is already due.
    let Some(virt_dt) = target_ticks.checked_sub(s.origin_virtual_ticks) else {
        return s.origin_real;
    };
    let real_ticks = virt_dt as u128 * ONE_Q32 as u128 / s.scale_q32 as u128;
    let real_ns = (real_ticks * 1_000_000_000 / TICK_HZ as u128).min(u64::MAX as u128) as u64;
    s.origin_real + Duration::from_nanos(real_ns)
}

fn ensure_wake_thread(s: &mut DriverState) {
    if s.wake_thread_started {
        return;
    }
    s.wake_thread_started = true;
    std::thread::Builder::new()
        .name("virtual-time-wake".into())
        .spawn(wake_thread)
        .expect("failed to start virtual time wake thread");
}

/// Waits for the earliest queued virtual deadline and fires its wakers.
fn wake_thread() {
    loop {
        let mut guard = state().lock().unwrap();
        while guard.queue.is_empty() {
            guard = WAKEUP.wait(guard).unwrap();
        }

        let now_v = real_to_virtual(&guard, StdInstant::now());
        let due: Vec<u64> = guard.queue.range(..=now_v).map(|(&t, _)| t).collect();
        if !due.is_empty() {
            let mut ready = Vec::new();
            for t in due {
                if let Some(wakers) = guard.queue.remove(&t) {
                    ready.extend(wakers);
                }
            }
            drop(guard);
            // Wake outside the lock so a woken task can immediately call
            // back into the driver.
            for waker in ready {
                waker.wake();
            }
            continue;
        }

        let (&next_at, _) = guard.queue.iter().next().unwrap();
        let target = virtual_to_real(&guard, next_at);
        let now_r = StdInstant::now();
        if target > now_r {
            let wait = (target - now_r).min(MAX_WAIT_SLICE);
            let (g, _) = WAKEUP.wait_timeout(guard, wait).unwrap();
            drop(g);
        }
    }
}

struct ScaledDriver;

impl Driver for ScaledDriver {
    fn now(&self) -> u64 {
        let guard = state().lock().unwrap();
        real_to_virtual(&guard, StdInstant::now())
    }

    fn schedule_wake(&self, at: u64, waker: &Waker) {
        let mut guard = state().lock().unwrap();
        ensure_wake_thread(&mut guard);
        guard.queue.entry(at).or_default().push(waker.clone());
        drop(guard);
        WAKEUP.notify_all();
    }
}

time_driver_impl!(static DRIVER: ScaledDriver = ScaledDriver);

/// Set the virtual clock speed in percent of real time (1..=10000).
///
/// Continuity-preserving: the virtual "now" is identical immediately before
/// and after the change; only the rate going forward differs.
pub fn set_time_scale_percent(percent: u32) {
    let percent = percent.clamp(1, 10_000);
    let mut guard = state().lock().unwrap();
    if guard.percent == percent {
        return;
    }
    let now_r = StdInstant::now();
    let now_v = real_to_virtual(&guard, now_r);
    let new_scale = percent as u128 * ONE_Q32 as u128 / 100;

    // Keep the virtual origin; move the real origin so that mapping now_r
    // under the new scale still yields now_v.
    let virt_dt = now_v.wrapping_sub(guard.origin_virtual_ticks) as u128;
    let real_ticks = virt_dt * ONE_Q32 as u128 / new_scale;
    let real_ns = (real_ticks * 1_000_000_000 / TICK_HZ as u128).min(u64::MAX as u128) as u64;
    guard.origin_real = now_r
        .checked_sub(Duration::from_nanos(real_ns))
        .unwrap_or(now_r);
    guard.scale_q32 = new_scale as u64;
    guard.percent = percent;
    drop(guard);
    WAKEUP.notify_all();
}

/// The exact percent last set (no floating-point drift).
pub fn time_scale_percent() -> u32 {
    state().lock().unwrap().percent
}
