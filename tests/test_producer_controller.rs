mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{start_test_producer_controller, start_test_producer_controller_with_durable_queue, test_producer_controller_config};
use reliable_delivery::durable_queue::InMemoryDurableProducerQueue;
use reliable_delivery::types::{Ack, Request, Resend, SeqNr};
use tokio::time::timeout;

const SHORT: Duration = Duration::from_millis(300);

#[tokio::test]
async fn lost_first_sequenced_message_is_resent_by_timer() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    let request_next = timeout(SHORT, producer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(request_next.current_seq_nr, SeqNr(1));
    assert_eq!(request_next.confirmed_seq_nr, SeqNr::ZERO);

    handle.msg("msg-1");

    let first = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(first.seq_nr, SeqNr(1));
    assert!(first.first);

    // Lost downstream: the resend-first timer re-emits it without a Request.
    let retransmit = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(retransmit.seq_nr, SeqNr(1));
    assert!(retransmit.first);

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    // Confirmed: the timer must not fire again.
    let result = timeout(Duration::from_millis(150), consumer_rx.recv()).await;
    assert!(result.is_err(), "no further re-emission expected after confirmation");
}

#[tokio::test]
async fn mid_stream_gap_is_filled_by_explicit_resend() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-1");
    consumer_rx.recv().await.unwrap();

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    for payload in ["msg-2", "msg-3", "msg-4"] {
        producer_rx.recv().await.unwrap();
        handle.msg(payload);
        let message = consumer_rx.recv().await.unwrap();
        assert_eq!(message.payload, payload);
    }

    handle.resend(Resend { from_seq_nr: SeqNr(3) });

    let resent_3 = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(resent_3.seq_nr, SeqNr(3));
    let resent_4 = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(resent_4.seq_nr, SeqNr(4));

    producer_rx.recv().await.unwrap();
    handle.msg("msg-5");
    let fifth = consumer_rx.recv().await.unwrap();
    assert_eq!(fifth.seq_nr, SeqNr(5));
}

#[tokio::test]
async fn tail_loss_detected_by_request_timeout_resends_buffer() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-1");
    consumer_rx.recv().await.unwrap();

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    for payload in ["msg-2", "msg-3", "msg-4"] {
        producer_rx.recv().await.unwrap();
        handle.msg(payload);
        consumer_rx.recv().await.unwrap();
    }

    // Consumer only saw seq 2, requests a liveness probe: seqs 3 and 4 were lost.
    handle.request(Request {
        confirmed_seq_nr: SeqNr(2),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: true,
    });

    let resent_3 = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(resent_3.seq_nr, SeqNr(3));
    let resent_4 = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(resent_4.seq_nr, SeqNr(4));
}

#[tokio::test]
async fn consumer_replacement_resends_from_earliest_unconfirmed() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-1");
    consumer_rx.recv().await.unwrap();

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    for payload in ["msg-2", "msg-3", "msg-4"] {
        producer_rx.recv().await.unwrap();
        handle.msg(payload);
        consumer_rx.recv().await.unwrap();
    }

    handle.ack(Ack { confirmed_seq_nr: SeqNr(2) });

    let (new_consumer_tx, mut new_consumer_rx) = tokio::sync::mpsc::unbounded_channel();
    handle.register_consumer(new_consumer_tx);

    let bootstrap = timeout(SHORT, new_consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(bootstrap.seq_nr, SeqNr(3));
    assert!(bootstrap.first);

    // Old consumer channel receives nothing further.
    assert!(timeout(Duration::from_millis(100), consumer_rx.recv()).await.is_err());

    // Without a Request it re-emits via the timer.
    let retransmit = timeout(SHORT, new_consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(retransmit.seq_nr, SeqNr(3));
    assert!(retransmit.first);

    handle.request(Request {
        confirmed_seq_nr: SeqNr(2),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    // Seq 3 already went out as the RegisterConsumer bootstrap; only the
    // remaining withheld tail (seq 4) flushes now.
    let seq4 = timeout(SHORT, new_consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seq4.seq_nr, SeqNr(4));

    producer_rx.recv().await.unwrap();
    handle.msg("msg-5");
    let seq5 = new_consumer_rx.recv().await.unwrap();
    assert_eq!(seq5.seq_nr, SeqNr(5));
}

#[tokio::test]
async fn confirmations_are_dispatched_in_ascending_order_exactly_once() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    let mut replies = Vec::new();
    for payload in ["msg-1", "msg-2", "msg-3", "msg-4"] {
        producer_rx.recv().await.unwrap();
        let reply = handle.msg_with_confirmation(payload);
        consumer_rx.recv().await.unwrap();
        replies.push(reply);
    }

    handle.ack(Ack { confirmed_seq_nr: SeqNr(4) });

    for (i, reply) in replies.into_iter().enumerate() {
        let seq = timeout(SHORT, reply).await.unwrap().unwrap();
        assert_eq!(seq, SeqNr((i + 1) as u64));
    }
}

#[tokio::test]
async fn support_resend_false_suppresses_retransmission() {
    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-1");
    consumer_rx.recv().await.unwrap();

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: false,
        via_timeout: false,
    });

    for payload in ["msg-2", "msg-3", "msg-4"] {
        producer_rx.recv().await.unwrap();
        handle.msg(payload);
        consumer_rx.recv().await.unwrap();
    }

    handle.request(Request {
        confirmed_seq_nr: SeqNr(2),
        requested_seq_nr: SeqNr(10),
        support_resend: false,
        via_timeout: true,
    });

    // No retransmission possible: the resend buffer was disabled.
    assert!(timeout(Duration::from_millis(150), consumer_rx.recv()).await.is_err());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-5");
    let fifth = consumer_rx.recv().await.unwrap();
    assert_eq!(fifth.seq_nr, SeqNr(5));
}

#[tokio::test]
async fn submit_without_outstanding_demand_terminates_the_task() {
    let (task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller("p-1", test_producer_controller_config());

    producer_rx.recv().await.unwrap();
    handle.msg("msg-1");
    consumer_rx.recv().await.unwrap();

    // No RequestNext has been issued (requested_seq_nr is still 0): a second
    // submission is a protocol violation and the controller must stop.
    handle.msg("msg-2");

    timeout(SHORT, task).await.unwrap().unwrap();
    assert!(consumer_rx.recv().await.is_none());
}

#[tokio::test]
async fn durable_recovery_bootstraps_unconfirmed_tail_to_new_consumer() {
    let durable_queue: Arc<InMemoryDurableProducerQueue<&'static str>> =
        Arc::new(InMemoryDurableProducerQueue::new());
    durable_queue.store_message_sent(SeqNr(1), "msg-1", true).await.unwrap();
    durable_queue.store_message_sent(SeqNr(2), "msg-2", true).await.unwrap();

    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller_with_durable_queue("p-1", test_producer_controller_config(), durable_queue);

    // The recovered unconfirmed tail replays to the newly registered
    // consumer as the RegisterConsumer bootstrap, without any Request.
    let bootstrap = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(bootstrap.seq_nr, SeqNr(1));
    assert!(bootstrap.first);

    let request_next = timeout(SHORT, producer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(request_next.current_seq_nr, SeqNr(3));

    handle.request(Request {
        confirmed_seq_nr: SeqNr(1),
        requested_seq_nr: SeqNr(10),
        support_resend: true,
        via_timeout: false,
    });

    // Seq 1 already went out as the bootstrap; only the withheld tail (seq
    // 2) flushes now.
    let seq2 = timeout(SHORT, consumer_rx.recv()).await.unwrap().unwrap();
    assert_eq!(seq2.seq_nr, SeqNr(2));
}

#[tokio::test]
async fn durable_mode_confirms_on_persistence_not_on_consumer_ack() {
    let durable_queue: Arc<InMemoryDurableProducerQueue<&'static str>> =
        Arc::new(InMemoryDurableProducerQueue::new());

    let (_task, handle, mut producer_rx, mut consumer_rx) =
        start_test_producer_controller_with_durable_queue("p-1", test_producer_controller_config(), durable_queue);

    producer_rx.recv().await.unwrap();
    let reply = handle.msg_with_confirmation("msg-1");
    consumer_rx.recv().await.unwrap();

    // The confirmation fires from durable persistence alone, without any
    // consumer Ack ever being sent.
    let seq = timeout(SHORT, reply).await.unwrap().unwrap();
    assert_eq!(seq, SeqNr(1));
}
