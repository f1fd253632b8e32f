use crate::{AllocError, AtomicIdAllocator, IdAllocator, MessageId, Poll, TimeSource};
use core::cell::Cell;
use core::time::Duration;
use std::collections::HashSet;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::scope;

struct MockTime {
    millis: u64,
}

impl TimeSource for MockTime {
    fn current_millis(&self) -> u64 {
        self.millis
    }
}

#[derive(Clone)]
struct SharedMockStepTime {
    clock: Rc<MockStepTime>,
}

struct MockStepTime {
    values: Vec<u64>,
    index: Cell<usize>,
}

impl SharedMockStepTime {
    fn new(values: Vec<u64>) -> Self {
        Self {
            clock: Rc::new(MockStepTime {
                values,
                index: Cell::new(0),
            }),
        }
    }

    fn advance(&self) {
        self.clock.index.set(self.clock.index.get() + 1);
    }
}

impl TimeSource for SharedMockStepTime {
    fn current_millis(&self) -> u64 {
        self.clock.values[self.clock.index.get()]
    }
}

/// A clock the test can move while the allocator is shared.
#[derive(Clone, Default)]
struct ManualTime {
    millis: Arc<AtomicU64>,
}

impl TimeSource for ManualTime {
    fn current_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

trait PollExt {
    fn unwrap_ready(self) -> MessageId;
    fn unwrap_pending(self) -> u64;
}

impl PollExt for Result<Poll, AllocError> {
    fn unwrap_ready(self) -> MessageId {
        match self {
            Ok(Poll::Ready { id }) => id,
            Ok(Poll::Pending { yield_for }) => {
                panic!("unexpected pending (yield for: {yield_for})")
            }
            Err(e) => panic!("unexpected error: {e}"),
        }
    }

    fn unwrap_pending(self) -> u64 {
        match self {
            Ok(Poll::Ready { id }) => panic!("unexpected ready ({id})"),
            Ok(Poll::Pending { yield_for }) => yield_for,
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
}

#[test]
fn sequence_increments_within_same_tick() {
    let allocator = AtomicIdAllocator::new(1, MockTime { millis: 42 });
    let id1 = allocator.try_poll_id().unwrap_ready();
    let id2 = allocator.try_poll_id().unwrap_ready();
    let id3 = allocator.try_poll_id().unwrap_ready();

    assert_eq!(id1.timestamp(), 42);
    assert_eq!(id3.timestamp(), 42);
    assert_eq!(id1.sequence(), 0);
    assert_eq!(id2.sequence(), 1);
    assert_eq!(id3.sequence(), 2);
    assert_eq!(id1.node_id(), 1);
    assert!(id1 < id2 && id2 < id3);
}

#[test]
fn pending_when_sequence_exhausted() {
    let allocator = AtomicIdAllocator::from_components(
        0,
        1,
        MessageId::max_sequence(),
        MockTime { millis: 0 },
    );
    assert_eq!(allocator.try_poll_id().unwrap_pending(), 1);
}

#[test]
fn rollover_resets_sequence_on_next_tick() {
    let time = SharedMockStepTime::new(vec![42, 43]);
    let allocator = AtomicIdAllocator::new(1, time.clone());

    for i in 0..=MessageId::max_sequence() {
        let id = allocator.try_poll_id().unwrap_ready();
        assert_eq!(id.sequence(), i);
        assert_eq!(id.timestamp(), 42);
    }
    assert_eq!(allocator.try_poll_id().unwrap_pending(), 1);

    time.advance();
    let id = allocator.try_poll_id().unwrap_ready();
    assert_eq!(id.timestamp(), 43);
    assert_eq!(id.sequence(), 0);
}

#[test]
fn small_backward_step_is_pending() {
    let time = SharedMockStepTime::new(vec![100, 90]);
    let allocator = AtomicIdAllocator::new(0, time.clone());
    allocator.try_poll_id().unwrap_ready();

    time.advance();
    assert_eq!(allocator.try_poll_id().unwrap_pending(), 10);
}

#[test]
fn large_backward_step_is_clock_drift() {
    let time = SharedMockStepTime::new(vec![10_000, 1_000]);
    let allocator = AtomicIdAllocator::new(0, time.clone()).with_max_drift(5_000);
    allocator.try_poll_id().unwrap_ready();

    time.advance();
    assert_eq!(
        allocator.try_poll_id(),
        Err(AllocError::ClockDrift {
            drift_ms: 9_000,
            max_drift_ms: 5_000
        })
    );
}

#[test]
fn timestamp_overflow_is_exhausted() {
    let allocator = AtomicIdAllocator::new(
        0,
        MockTime {
            millis: MessageId::max_timestamp() + 1,
        },
    );
    assert!(matches!(
        allocator.try_poll_id(),
        Err(AllocError::Exhausted { .. })
    ));
}

#[test]
fn try_new_rejects_wide_node_id() {
    let err = AtomicIdAllocator::try_new(1024, MockTime { millis: 0 })
        .err()
        .unwrap();
    assert_eq!(
        err,
        AllocError::InvalidNodeId {
            node_id: 1024,
            max: 1023
        }
    );
    assert_eq!(
        AtomicIdAllocator::try_new(1023, MockTime { millis: 0 })
            .unwrap()
            .node_id(),
        1023
    );
}

#[test]
fn resumed_allocator_issues_above_the_stored_id() {
    let last = MessageId::from(1_000, 3, 4);
    let allocator =
        AtomicIdAllocator::try_resume_after(3, Some(last), MockTime { millis: 1_000 }).unwrap();

    let id = allocator.try_poll_id().unwrap_ready();
    assert!(id > last);
    assert_eq!(id, MessageId::from(1_000, 3, 5));
}

#[test]
fn resumed_allocator_waits_for_a_lagging_clock() {
    let last = MessageId::from(1_000, 0, 0);
    let time = SharedMockStepTime::new(vec![998, 999, 1_000]);
    let allocator = AtomicIdAllocator::try_resume_after(0, Some(last), time.clone()).unwrap();

    assert_eq!(allocator.try_poll_id().unwrap_pending(), 2);
    time.advance();
    assert_eq!(allocator.try_poll_id().unwrap_pending(), 1);
    time.advance();
    assert_eq!(
        allocator.try_poll_id().unwrap_ready(),
        MessageId::from(1_000, 0, 1)
    );
}

#[test]
fn resumed_allocator_rejects_a_clock_far_behind() {
    let last = MessageId::from(20_000, 0, 0);
    let allocator =
        AtomicIdAllocator::try_resume_after(0, Some(last), MockTime { millis: 1_000 }).unwrap();
    assert_eq!(
        allocator.try_poll_id(),
        Err(AllocError::ClockDrift {
            drift_ms: 19_000,
            max_drift_ms: 5_000
        })
    );
}

#[test]
fn resume_ignores_an_id_from_another_node() {
    let foreign = MessageId::from(1_000, 5, 3);
    let allocator =
        AtomicIdAllocator::try_resume_after(0, Some(foreign), MockTime { millis: 1_000 }).unwrap();
    assert_eq!(
        allocator.try_poll_id().unwrap_ready(),
        MessageId::from(1_000, 0, 0)
    );

    assert!(matches!(
        AtomicIdAllocator::try_resume_after(1024, None, MockTime { millis: 0 }),
        Err(AllocError::InvalidNodeId { .. })
    ));
}

#[test]
fn blocking_acquisition_stalls_on_a_frozen_clock() {
    let allocator = AtomicIdAllocator::from_components(
        5,
        0,
        MessageId::max_sequence(),
        MockTime { millis: 5 },
    );
    let err = allocator.try_next_id(Duration::from_millis(5)).unwrap_err();
    assert!(matches!(err, AllocError::Stalled { waited_ms } if waited_ms >= 5));
}

#[test]
fn blocking_acquisition_waits_for_the_next_tick() {
    let time = ManualTime::default();
    time.millis.store(7, Ordering::SeqCst);
    let allocator =
        AtomicIdAllocator::from_components(7, 3, MessageId::max_sequence(), time.clone());

    let id = scope(|s| {
        let handle = s.spawn(|| allocator.try_next_id(Duration::from_secs(5)));
        std::thread::sleep(Duration::from_millis(10));
        time.millis.store(8, Ordering::SeqCst);
        handle.join().unwrap()
    })
    .unwrap();

    assert_eq!(id.timestamp(), 8);
    assert_eq!(id.sequence(), 0);
    assert_eq!(id.node_id(), 3);
}

#[test]
fn shared_allocator_never_repeats_an_id() {
    const THREADS: usize = 8;
    const IDS_PER_THREAD: usize = 4096;

    let allocator = AtomicIdAllocator::new(9, crate::SystemClock::default());
    let seen = std::sync::Mutex::new(HashSet::with_capacity(THREADS * IDS_PER_THREAD));

    scope(|s| {
        for _ in 0..THREADS {
            s.spawn(|| {
                let mut local = Vec::with_capacity(IDS_PER_THREAD);
                let mut last = None;
                for _ in 0..IDS_PER_THREAD {
                    let id = allocator.try_next_id(Duration::from_secs(5)).unwrap();
                    // Per-caller monotonic
                    if let Some(prev) = last {
                        assert!(id > prev);
                    }
                    last = Some(id);
                    local.push(id);
                }
                let mut seen = seen.lock().unwrap();
                for id in local {
                    assert!(seen.insert(id), "duplicate ID {id}");
                }
            });
        }
    });

    assert_eq!(seen.lock().unwrap().len(), THREADS * IDS_PER_THREAD);
}

#[test]
fn distinct_nodes_never_collide_on_the_same_tick() {
    let a = AtomicIdAllocator::new(1, MockTime { millis: 77 });
    let b = AtomicIdAllocator::new(2, MockTime { millis: 77 });
    let mut seen = HashSet::new();
    for _ in 0..100 {
        assert!(seen.insert(a.try_poll_id().unwrap_ready()));
        assert!(seen.insert(b.try_poll_id().unwrap_ready()));
    }
}
