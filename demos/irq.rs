//! Simulated hardware interrupts served by one thread that never yields.
//!
//! Scheduling is cooperative: once `schedule()` dispatches the simulator,
//! nothing takes the processor back from it. The host is not adopted and
//! every other thread would starve, so this program runs until it is
//! killed. That is the contract, not a bug: a thread that wants to share
//! the processor has to call `yield_now()`.

use std::thread::sleep;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use qthread::Scheduler;

#[derive(Debug, Clone, Copy)]
enum Irq {
    Keyboard = 0,
    Mouse = 1,
    Timer = 2,
    Audio = 3,
}

const HANDLERS: [(Irq, fn(Irq)); 4] = [
    (Irq::Keyboard, handle_keyboard),
    (Irq::Mouse, handle_mouse),
    (Irq::Timer, handle_timer),
    (Irq::Audio, handle_audio),
];

fn handle_keyboard(irq: Irq) {
    println!("Handling interrupt: KEYBOARD -> IRQ {}", irq as u8);
}

fn handle_mouse(irq: Irq) {
    println!("Handling interrupt: MOUSE -> IRQ {}", irq as u8);
}

fn handle_timer(irq: Irq) {
    println!("Handling interrupt: TIMER -> IRQ {}", irq as u8);
}

fn handle_audio(irq: Irq) {
    println!("Handling interrupt: AUDIO -> IRQ {}", irq as u8);
}

/// Cheap pseudo-random pick; the clock's nanoseconds are noisy enough here.
fn next_irq() -> usize {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    (nanos as usize / 1000) % HANDLERS.len()
}

fn main() {
    let scheduler = Scheduler::new().expect("failed to start scheduler");

    scheduler
        .create(|| {
            loop {
                sleep(Duration::from_secs(1));
                let (irq, handler) = HANDLERS[next_irq()];
                handler(irq);
            }
        })
        .expect("failed to create interrupt simulator");

    // Never returns: the simulator does not yield.
    scheduler.schedule();
}
