//! Integration tests for the connectors and their backpressure protocol

mod common;

use common::builders::{inline_dataflow, pooled_dataflow};
use common::subscribers::{RecordingSubscriber, Signal};
use common::test_timeout;
use dataflow_rs::{
    Actor, BoundedQueue, DataflowError, MulticastStream, ScalarResult, StreamPublisher,
    UnicastMode, UnicastStream,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

// ==================== Scalar ====================

#[test]
fn test_scalar_result_reaches_every_subscriber_once() {
    let result: ScalarResult<String> = ScalarResult::new();
    let hits = Arc::new(AtomicUsize::new(0));

    for _ in 0..3 {
        let hits = hits.clone();
        result.subscribe(move |outcome| {
            assert_eq!(outcome.unwrap(), "done");
            hits.fetch_add(1, Ordering::SeqCst);
        });
    }
    assert!(result.complete("done".to_string()));
    assert!(!result.complete("again".to_string()));

    let late = hits.clone();
    result.subscribe(move |outcome| {
        assert_eq!(outcome.unwrap(), "done");
        late.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(hits.load(Ordering::SeqCst), 4);
}

// ==================== Bounded queue ====================

#[test]
fn test_queue_capacity_three_scenario() {
    let queue = BoundedQueue::new(3).unwrap();
    let offers: Vec<bool> = (1..=5).map(|i| queue.offer(i).is_ok()).collect();
    assert_eq!(offers, vec![true, true, true, false, false]);
    assert_eq!(queue.take().unwrap(), 1);
    assert!(queue.offer(6).is_ok());
    assert_eq!(queue.len(), 3);
}

#[test]
fn test_each_freed_slot_releases_one_producer() {
    let queue = BoundedQueue::new(1).unwrap();
    queue.put(0).unwrap();
    let finished = Arc::new(AtomicUsize::new(0));

    let producers: Vec<_> = (1..=3)
        .map(|i| {
            let queue = queue.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                queue.put(i).unwrap();
                finished.fetch_add(1, Ordering::SeqCst);
            })
        })
        .collect();
    thread::sleep(Duration::from_millis(30));
    assert_eq!(finished.load(Ordering::SeqCst), 0);

    for freed in 1..=3 {
        queue.take().unwrap();
        assert!(common::wait_until(|| finished.load(Ordering::SeqCst) == freed));
        thread::sleep(Duration::from_millis(10));
        assert_eq!(finished.load(Ordering::SeqCst), freed);
        assert_eq!(queue.len(), 1);
    }
    for producer in producers {
        producer.join().unwrap();
    }
}

#[test]
fn test_queue_feeds_subscriber_by_demand() {
    let queue = BoundedQueue::<u32>::new(4).unwrap();
    let subscriber = RecordingSubscriber::<u32>::new(0);
    queue.subscribe(subscriber.clone()).unwrap();

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..10 {
                queue.put(i).unwrap();
            }
            queue.complete();
        })
    };

    subscriber.request(3);
    assert_eq!(subscriber.await_items(3, test_timeout()), vec![0, 1, 2]);
    thread::sleep(Duration::from_millis(20));
    assert_eq!(subscriber.items().len(), 3);
    assert!(queue.len() <= 4);

    subscriber.request(100);
    assert_eq!(subscriber.await_signal(test_timeout()), Some(Signal::Completed));
    assert_eq!(subscriber.items(), (0..10).collect::<Vec<_>>());
    producer.join().unwrap();
}

#[test]
fn test_queue_error_broadcast_to_passive_subscribers() {
    let queue = BoundedQueue::<u8>::new(2).unwrap();
    let active = RecordingSubscriber::<u8>::new(5);
    let passive = RecordingSubscriber::<u8>::new(0);
    queue.subscribe(active.clone()).unwrap();
    queue.subscribe(passive.clone()).unwrap();

    queue.complete_exceptionally(DataflowError::Timer("lost".to_string()));
    for subscriber in [&active, &passive] {
        match subscriber.signal() {
            Some(Signal::Failed(msg)) => assert!(msg.contains("lost")),
            other => panic!("unexpected signal {:?}", other),
        }
    }

    let late = RecordingSubscriber::<u8>::new(0);
    queue.subscribe(late.clone()).unwrap();
    assert!(matches!(late.signal(), Some(Signal::Failed(_))));
}

// ==================== Unicast ====================

#[test]
fn test_exclusive_unicast_single_subscriber() {
    let stream = UnicastStream::<u8>::exclusive(4).unwrap();
    let first = RecordingSubscriber::<u8>::new(10);
    stream.subscribe(first.clone()).unwrap();
    assert!(matches!(
        stream.subscribe(RecordingSubscriber::<u8>::new(1)),
        Err(DataflowError::AlreadySubscribed)
    ));

    for i in 0..3 {
        stream.post(i).unwrap();
    }
    stream.complete();
    assert_eq!(first.items(), vec![0, 1, 2]);
    assert_eq!(first.signal(), Some(Signal::Completed));
}

#[test]
fn test_round_robin_delivers_each_item_once() {
    let stream = UnicastStream::<u32>::round_robin(16).unwrap();
    let subscribers: Vec<_> = (0..3)
        .map(|_| {
            let s = RecordingSubscriber::<u32>::new(100);
            stream.subscribe(s.clone()).unwrap();
            s
        })
        .collect();

    for i in 0..30 {
        stream.post(i).unwrap();
    }
    stream.complete();

    let mut all = Vec::new();
    for subscriber in &subscribers {
        let items = subscriber.items();
        assert_eq!(items.len(), 10);
        assert!(items.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(subscriber.signal(), Some(Signal::Completed));
        all.extend(items);
    }
    all.sort_unstable();
    assert_eq!(all, (0..30).collect::<Vec<_>>());
}

#[test]
fn test_actor_pipeline_with_backpressure() {
    const ITEMS: u64 = 200;
    let dataflow = pooled_dataflow(3);

    let producer = Actor::<()>::new(&dataflow);
    let output = producer
        .stream_output::<u64>(2, UnicastMode::Exclusive)
        .unwrap();
    let out = output.clone();
    let mut next = 0;
    producer.set_action(move |ctx| {
        out.post(next)?;
        next += 1;
        if next == ITEMS {
            out.complete();
            ctx.complete(());
        }
        Ok(())
    });

    let consumer = Actor::<u64>::new(&dataflow);
    let input = consumer.stream_input::<u64>(4).unwrap();
    input.subscribe_to(&output).unwrap();
    let inp = input.clone();
    let mut sum = 0;
    consumer.set_action(move |ctx| {
        match inp.take() {
            Some(v) => sum += v,
            None if inp.is_completed() => {
                ctx.complete(sum);
            }
            None => {}
        }
        Ok(())
    });

    consumer.start().unwrap();
    producer.start().unwrap();

    let total = consumer.result().get_timeout(test_timeout()).unwrap();
    assert_eq!(total, (0..ITEMS).sum::<u64>());
    dataflow.join_timeout(test_timeout()).unwrap();
}

// ==================== Multicast ====================

#[test]
fn test_multicast_late_subscriber_scenario() {
    let stream = MulticastStream::<char>::new();
    let s1 = RecordingSubscriber::<char>::new(10);
    stream.subscribe(s1.clone()).unwrap();
    stream.emit('a').unwrap();
    let s2 = RecordingSubscriber::<char>::new(10);
    stream.subscribe(s2.clone()).unwrap();
    stream.emit('b').unwrap();
    stream.emit('c').unwrap();
    stream.complete();

    assert_eq!(s1.items(), vec!['a', 'b', 'c']);
    assert_eq!(s2.items(), vec!['b', 'c']);
    assert_eq!(s1.signal(), Some(Signal::Completed));
    assert_eq!(s2.signal(), Some(Signal::Completed));
}

#[test]
fn test_multicast_feeds_actor_input() {
    let dataflow = inline_dataflow();
    let stream = MulticastStream::<u8>::new();
    let consumers: Vec<_> = (0..2)
        .map(|_| {
            let actor = Actor::<Vec<u8>>::new(&dataflow);
            let input = actor.stream_input::<u8>(2).unwrap();
            input.subscribe_to(&stream).unwrap();
            let inp = input.clone();
            let mut seen = Vec::new();
            actor.set_action(move |ctx| {
                match inp.take() {
                    Some(v) => seen.push(v),
                    None if inp.is_completed() => {
                        ctx.complete(seen.clone());
                    }
                    None => {}
                }
                Ok(())
            });
            actor.start().unwrap();
            actor
        })
        .collect();

    for v in 0..10 {
        stream.emit(v).unwrap();
    }
    stream.complete();

    for consumer in &consumers {
        assert_eq!(consumer.result().get().unwrap(), (0..10).collect::<Vec<_>>());
    }
    assert!(dataflow.is_completed());
}

#[test]
fn test_no_delivery_after_cancel_returns() {
    let stream = MulticastStream::<u64>::new();
    let subscriber = RecordingSubscriber::<u64>::new(u64::MAX);
    stream.subscribe(subscriber.clone()).unwrap();

    let emitter = {
        let stream = stream.clone();
        thread::spawn(move || {
            for i in 0..10_000 {
                stream.emit(i).unwrap();
            }
        })
    };
    thread::sleep(Duration::from_millis(1));
    subscriber.cancel();
    let seen = subscriber.items().len();
    emitter.join().unwrap();

    assert_eq!(subscriber.items().len(), seen);
    assert_eq!(stream.subscriber_count(), 0);
}

#[test]
fn test_queue_no_delivery_after_cancel_returns() {
    let queue = BoundedQueue::<u64>::new(16).unwrap();
    let subscriber = RecordingSubscriber::<u64>::new(u64::MAX);
    queue.subscribe(subscriber.clone()).unwrap();

    let producer = {
        let queue = queue.clone();
        thread::spawn(move || {
            for i in 0..10_000 {
                if queue.offer_timeout(i, Duration::from_millis(10)).is_err() {
                    break;
                }
            }
        })
    };
    thread::sleep(Duration::from_millis(1));
    subscriber.cancel();
    let seen = subscriber.items().len();
    producer.join().unwrap();

    assert_eq!(subscriber.items().len(), seen);
    assert_eq!(queue.subscriber_count(), 0);
}

#[test]
fn test_round_robin_no_delivery_after_cancel_returns() {
    let stream = UnicastStream::<u64>::unbounded(UnicastMode::RoundRobin);
    let subscriber = RecordingSubscriber::<u64>::new(u64::MAX);
    stream.subscribe(subscriber.clone()).unwrap();

    let poster = {
        let stream = stream.clone();
        thread::spawn(move || {
            for i in 0..10_000 {
                stream.post(i).unwrap();
            }
        })
    };
    thread::sleep(Duration::from_millis(1));
    subscriber.cancel();
    let seen = subscriber.items().len();
    poster.join().unwrap();

    assert_eq!(subscriber.items().len(), seen);
    assert_eq!(stream.subscriber_count(), 0);
}
