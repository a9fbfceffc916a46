//! Three threads taking turns, joined by a host that never adopts itself.

use qthread::{Scheduler, current, yield_now};

fn main() {
    let scheduler = Scheduler::new().expect("failed to start scheduler");
    scheduler.set_stack_size(128 * 1024);

    let handles: Vec<_> = (1..=3)
        .map(|id| {
            scheduler
                .create(move || {
                    for i in 0..5 {
                        println!("Thread {id} (self: {:?}): iteration {i}", current());
                        yield_now();
                    }
                })
                .expect("failed to create thread")
        })
        .collect();

    for handle in handles {
        scheduler.join(handle).expect("failed to join thread");
    }

    println!("All threads finished.");
}
