//! Workers hand results back through `exit`; worker 4 reports an error.

use qthread::{Scheduler, exit, yield_now};

const ERROR_SENTINEL: usize = 0xDEAD_BEEF;

fn worker(id: usize) {
    if id == 4 {
        exit(ERROR_SENTINEL);
    }

    for _ in 0..3 {
        println!("Worker {id}: working...");
        yield_now();
    }

    let result = Box::new(id * 100);
    exit(Box::into_raw(result) as usize);
}

fn main() {
    let scheduler = Scheduler::new().expect("failed to start scheduler");
    // The host joins the round robin so control comes back to it.
    scheduler.init().expect("failed to adopt main thread");
    scheduler.set_stack_size(64 * 1024);

    let workers: Vec<_> = (1..=5)
        .map(|id| {
            scheduler
                .create_with(worker, id)
                .expect("failed to create worker")
        })
        .collect();

    scheduler.schedule();

    for (id, handle) in (1..=5).zip(workers) {
        let value = scheduler.join(handle).expect("failed to join worker");
        if value == ERROR_SENTINEL {
            println!("Thread {id}: ERROR");
        } else {
            let result = unsafe { Box::from_raw(value as *mut usize) };
            println!("Thread {id}: Result = {result}");
        }
    }

    println!("All workers completed");
}
