mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{eventually, wait_for_state, writer_config, RecordingSink};
use tracing_rusoto_appenders::{
    DefaultThreadFactory, DiscardAction, Level, LogMessage, MemoryLog, SinkError, SinkWriter,
    ThreadFactory, WriterError, WriterState,
};
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn test_batches_respect_count_limit_and_are_sorted() {
    let sink = RecordingSink::new(3, 1024);
    let writer = SinkWriter::new(sink.clone(), &writer_config(50));
    let handle = writer.handle();
    for ts in (1..=5).rev() {
        handle.add_message(LogMessage::new(ts, format!("m{}", ts)));
    }

    let start = Instant::now();
    let join = tokio::spawn(writer.run());
    assert!(eventually(Duration::from_secs(10), || sink.delivered().len() == 5).await);
    assert_eq!(
        sink.batches(),
        vec![vec!["m3", "m4", "m5"], vec!["m1", "m2"]]
    );
    assert_eq!(handle.messages_sent(), 5);

    // a full batch goes out at once, a partial one after a whole batch delay
    let elapsed: Vec<Duration> = sink.times().iter().map(|t| *t - start).collect();
    assert_eq!(elapsed[0], Duration::ZERO);
    assert!(elapsed[1] >= Duration::from_millis(50));
    assert!(elapsed[1] < Duration::from_millis(60));

    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));
    assert_eq!(handle.state(), WriterState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_partial_batch_gathers_late_arrivals() {
    let sink = RecordingSink::new(3, 1024);
    let writer = SinkWriter::new(sink.clone(), &writer_config(50));
    let handle = writer.handle();
    let start = Instant::now();
    let join = tokio::spawn(writer.run());
    assert!(wait_for_state(&handle, WriterState::Running).await);

    handle.add_message(LogMessage::new(1, "m1"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.add_message(LogMessage::new(2, "m2"));
    assert!(eventually(Duration::from_secs(1), || sink.delivered().len() == 2).await);

    assert_eq!(sink.batches(), vec![vec!["m1", "m2"]]);
    assert!(sink.times()[0] - start >= Duration::from_millis(50));

    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_failed_sends_keep_messages_in_order() {
    let sink = RecordingSink::new(10, 1024);
    sink.set_failing(true);
    let writer = SinkWriter::new(sink.clone(), &writer_config(100));
    let handle = writer.handle();
    for ts in 1..=5 {
        handle.add_message(LogMessage::new(ts, format!("m{}", ts)));
    }

    let join = tokio::spawn(writer.run());
    assert!(eventually(Duration::from_secs(10), || sink.attempts() >= 3).await);
    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));

    assert!(sink.delivered().is_empty());
    assert_eq!(handle.messages_sent(), 0);
    assert_eq!(
        common::contents(&handle.queue().drain_all()),
        vec!["m1", "m2", "m3", "m4", "m5"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_retry_waits_for_batch_delay() {
    let sink = RecordingSink::new(10, 1024);
    sink.set_failing(true);
    let writer = SinkWriter::new(sink.clone(), &writer_config(1000));
    let handle = writer.handle();
    handle.add_message(LogMessage::new(1, "m1"));

    let join = tokio::spawn(writer.run());
    assert!(eventually(Duration::from_secs(2), || sink.attempts() == 1).await);
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(sink.attempts(), 1);

    sink.set_failing(false);
    assert!(eventually(Duration::from_secs(2), || sink.delivered().len() == 1).await);
    assert_eq!(sink.attempts(), 2);

    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_initialization_failure_is_fatal() {
    let sink = RecordingSink::new(10, 1024).failing_init();
    let writer = SinkWriter::new(sink.clone(), &writer_config(100));
    let handle = writer.handle();
    handle.add_message(LogMessage::new(1, "never sent"));

    let result = tokio::spawn(writer.run()).await.unwrap();
    let expected = WriterError::DestinationUnavailable(SinkError::Service(
        "destination rejected".to_string(),
    ));
    assert_eq!(result, Err(expected.clone()));
    assert_eq!(handle.state(), WriterState::Failed);
    assert_eq!(handle.last_error(), Some(expected));
    assert_eq!(sink.attempts(), 0);
    assert_eq!(handle.queue().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stop_flushes_remaining_messages() {
    let sink = RecordingSink::new(2, 1024);
    let writer = SinkWriter::new(sink.clone(), &writer_config(60_000));
    let handle = writer.handle();
    let join = tokio::spawn(writer.run());
    assert!(wait_for_state(&handle, WriterState::Running).await);

    for ts in 1..=5 {
        handle.add_message(LogMessage::new(ts, format!("m{}", ts)));
    }
    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));

    assert_eq!(
        sink.batches(),
        vec![vec!["m1", "m2"], vec!["m3", "m4"], vec!["m5"]]
    );
    assert_eq!(handle.state(), WriterState::Stopped);
    assert!(handle.queue().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_flush_gives_up_after_first_failure() {
    let sink = RecordingSink::new(2, 1024);
    let log = Arc::new(MemoryLog::new());
    let writer = SinkWriter::new(sink.clone(), &writer_config(60_000)).with_log(log.clone());
    let handle = writer.handle();
    let join = tokio::spawn(writer.run());
    assert!(wait_for_state(&handle, WriterState::Running).await);

    sink.set_failing(true);
    for ts in 1..=5 {
        handle.add_message(LogMessage::new(ts, format!("m{}", ts)));
    }
    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));

    assert_eq!(sink.attempts(), 1);
    assert_eq!(handle.queue().len(), 5);
    assert_eq!(handle.state(), WriterState::Stopped);
    assert_eq!(log.entries_at(Level::Warn).len(), 1);
}

#[tokio::test]
async fn test_stop_ends_while_producers_keep_writing() {
    let sink = RecordingSink::new(10, 1024);
    let writer = SinkWriter::new(sink.clone(), &writer_config(10));
    let handle = writer.handle();
    let join = tokio::spawn(writer.run());
    assert!(wait_for_state(&handle, WriterState::Running).await);

    let done = Arc::new(AtomicBool::new(false));
    let producer = {
        let handle = handle.clone();
        let done = Arc::clone(&done);
        thread::spawn(move || {
            let give_up = std::time::Instant::now() + Duration::from_secs(10);
            let mut ts = 0;
            while !done.load(Ordering::SeqCst) {
                if std::time::Instant::now() >= give_up {
                    return false;
                }
                ts += 1;
                handle.add_message(LogMessage::new(ts, "busy"));
            }
            true
        })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.stop();
    let result = tokio::time::timeout(Duration::from_secs(5), join).await;
    done.store(true, Ordering::SeqCst);
    let stopped_by_test = producer.join().unwrap();

    assert_eq!(result.unwrap().unwrap(), Ok(()));
    assert!(stopped_by_test);
    assert_eq!(handle.state(), WriterState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_oversized_message_is_dropped() {
    let sink = RecordingSink::new(10, 10);
    let log = Arc::new(MemoryLog::new());
    let writer = SinkWriter::new(sink.clone(), &writer_config(100)).with_log(log.clone());
    let handle = writer.handle();
    handle.add_message(LogMessage::new(1, "this message is far too long"));
    handle.add_message(LogMessage::new(2, "ok"));

    let join = tokio::spawn(writer.run());
    assert!(eventually(Duration::from_secs(10), || sink.delivered().len() == 1).await);
    assert_eq!(sink.batches(), vec![vec!["ok"]]);

    let errors = log.entries_at(Level::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].message.contains("28 bytes"));

    handle.stop();
    assert_eq!(join.await.unwrap(), Ok(()));
}

#[tokio::test(start_paused = true)]
async fn test_stop_before_running_ends_stopped() {
    let sink = RecordingSink::new(10, 1024);
    let writer = SinkWriter::new(sink.clone(), &writer_config(100));
    let handle = writer.handle();
    handle.stop();

    assert_eq!(tokio::spawn(writer.run()).await.unwrap(), Ok(()));
    assert_eq!(handle.state(), WriterState::Stopped);
    assert_eq!(handle.last_error(), None);
}

#[test]
fn test_handle_settings_apply_to_live_writer() {
    let sink = RecordingSink::new(10, 1024);
    let writer = SinkWriter::new(sink, &writer_config(100));
    let handle = writer.handle();
    assert_eq!(handle.state(), WriterState::Initializing);
    assert_eq!(handle.batch_delay(), Duration::from_millis(100));

    handle.set_batch_delay(Duration::from_millis(250));
    assert_eq!(handle.batch_delay(), Duration::from_millis(250));

    handle.set_discard_action(DiscardAction::Oldest);
    handle.set_discard_threshold(2);
    for ts in 1..=3 {
        handle.add_message(LogMessage::new(ts, format!("m{}", ts)));
    }
    assert_eq!(handle.queue().len(), 2);
    assert_eq!(handle.queue().dropped_count(), 1);
    assert_eq!(
        common::contents(&handle.queue().drain_all()),
        vec!["m2", "m3"]
    );
}

#[test]
fn test_panicking_writer_is_reported() {
    let sink = RecordingSink::new(10, 1024).panicking();
    let writer = SinkWriter::new(sink, &writer_config(10));
    let handle = writer.handle();
    handle.add_message(LogMessage::new(1, "m1"));

    let (tx, rx) = mpsc::channel();
    let tx = parking_lot::Mutex::new(tx);
    DefaultThreadFactory::new().start_writer(
        Box::new(writer),
        Arc::new(move |err: WriterError| {
            let _ = tx.lock().send(err);
        }),
    );

    let err = rx.recv_timeout(Duration::from_secs(10)).unwrap();
    assert_eq!(err, WriterError::Panicked("boom".to_string()));
    assert_eq!(handle.state(), WriterState::Failed);
    assert_eq!(handle.last_error(), Some(err));
}
