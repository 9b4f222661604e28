//! The scheduler loop driven on its own host thread, fed by producer threads.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use once_cell::sync::Lazy;

use qv::kernel::{Kernel, KernelConfig, SchedulerState};
use qv::{new_active_object, ActiveBehavior, ActiveContext, DynEvent, Signal};

static IDLE_THREADS: Lazy<Mutex<HashSet<ThreadId>>> = Lazy::new(Default::default);

fn record_idle() {
    IDLE_THREADS.lock().unwrap().insert(thread::current().id());
}

type Seen = Arc<Mutex<Vec<(u8, u16)>>>;

struct Tally {
    seen: Seen,
}

impl ActiveBehavior for Tally {
    fn on_start(&mut self, _ctx: &mut ActiveContext) {}

    fn on_event(&mut self, ctx: &mut ActiveContext, event: DynEvent) {
        self.seen
            .lock()
            .unwrap()
            .push((ctx.priority(), event.signal().0));
    }
}

fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

const PRODUCERS: u16 = 4;
const POSTS_PER_PRODUCER: u16 = 25;

#[test]
fn producers_on_host_threads_wake_the_loop() {
    let seen = Seen::default();
    let config = KernelConfig::builder().idle_callback(record_idle).build();
    let kernel = Arc::new(
        Kernel::with_config(config)
            .register(new_active_object(1, 100, Tally { seen: Arc::clone(&seen) }))
            .register(new_active_object(2, 100, Tally { seen: Arc::clone(&seen) }))
            .build()
            .unwrap(),
    );

    let runner = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.run())
    };
    let runner_id = runner.thread().id();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| {
            let handle = kernel.handle();
            thread::spawn(move || {
                for seq in 0..POSTS_PER_PRODUCER {
                    let target = (producer % 2 + 1) as u8;
                    let signal = Signal(producer * 100 + seq);
                    handle.post(target, DynEvent::immortal(signal)).unwrap();
                }
            })
        })
        .collect();
    for producer in producers {
        producer.join().unwrap();
    }

    let total = (PRODUCERS * POSTS_PER_PRODUCER) as usize;
    wait_for("all events", || seen.lock().unwrap().len() == total);
    wait_for("the loop to idle", || IDLE_THREADS.lock().unwrap().contains(&runner_id));

    kernel.handle().stop();
    runner.join().unwrap();
    assert_eq!(kernel.scheduler_state(), SchedulerState::Draining);

    // FIFO per producer
    let seen = seen.lock().unwrap();
    for producer in 0..PRODUCERS {
        let sequence: Vec<u16> = seen
            .iter()
            .filter(|(_, signal)| signal / 100 == producer)
            .map(|(_, signal)| signal % 100)
            .collect();
        assert_eq!(sequence, (0..POSTS_PER_PRODUCER).collect::<Vec<_>>());
    }
    assert!(!kernel.has_pending_work());
}

#[test]
fn stop_wakes_an_idle_loop() {
    let kernel = Arc::new(
        Kernel::builder()
            .register(new_active_object(3, 4, Tally { seen: Seen::default() }))
            .build()
            .unwrap(),
    );

    let runner = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.run())
    };

    kernel.post(3, DynEvent::immortal(Signal(1))).unwrap();
    wait_for("the event to drain", || !kernel.has_pending_work());
    thread::sleep(Duration::from_millis(10));

    kernel.stop();
    runner.join().unwrap();
}

#[test]
fn events_posted_before_run_are_not_lost() {
    let seen = Seen::default();
    let kernel = Arc::new(
        Kernel::builder()
            .register(new_active_object(7, 4, Tally { seen: Arc::clone(&seen) }))
            .build()
            .unwrap(),
    );
    kernel.post(7, DynEvent::immortal(Signal(1))).unwrap();
    kernel.post(7, DynEvent::immortal(Signal(2))).unwrap();

    let runner = {
        let kernel = Arc::clone(&kernel);
        thread::spawn(move || kernel.run())
    };
    wait_for("queued events", || seen.lock().unwrap().len() == 2);

    kernel.stop();
    runner.join().unwrap();
    assert_eq!(seen.lock().unwrap().as_slice(), &[(7, 1), (7, 2)]);
}
