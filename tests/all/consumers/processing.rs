use crate::{
    consumers::{recording_processor, shutdown_after},
    helpers::{BrokerCall, Failures, MockBroker},
};
use amqp_worker::consumers::{Processor, ProcessorError};
use shutdown_handler::ShutdownHandler;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

#[tokio::test]
async fn a_successful_message_is_acked_then_the_consumer_is_cancelled_and_the_connection_closed() {
    // Arrange
    let broker = MockBroker::new();
    let (processor, seen) = recording_processor(&broker);
    let payload = serde_json::to_vec(&serde_json::json!({"id": 1})).unwrap();
    let delivery_tag = broker.publish(payload.clone());

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(*seen.lock().unwrap(), vec![payload]);
    let consumer_tag = broker.consumer_tags().pop().unwrap();
    assert_eq!(
        broker.calls(),
        vec![
            BrokerCall::Connect {
                address: "amqp://broker".into()
            },
            BrokerCall::CreateChannel,
            BrokerCall::Qos { prefetch_count: 1 },
            BrokerCall::Consume {
                queue: "orders".into(),
                consumer_tag: consumer_tag.clone(),
                no_local: false,
                no_ack: false,
                exclusive: false,
                nowait: false,
            },
            BrokerCall::Ack {
                delivery_tag,
                multiple: false,
            },
            BrokerCall::Cancel {
                consumer_tag,
                nowait: true,
            },
            BrokerCall::Close,
        ]
    );
}

#[tokio::test]
async fn a_failed_message_is_never_acked() {
    // Arrange
    let broker = MockBroker::new();
    let processor = Processor::builder(broker.clone(), "amqp://broker", "orders")
        .handler(|_shutdown, _payload| async move {
            Err::<(), _>(anyhow::anyhow!("downstream service unavailable"))
        })
        .build()
        .unwrap();
    broker.publish("Not relevant");

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    assert!(result.is_ok());
    assert!(broker.acks().is_empty());
    assert!(broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .is_some());
    assert_eq!(broker.calls().last(), Some(&BrokerCall::Close));
}

#[tokio::test]
async fn a_panicking_message_processor_leaves_the_message_unacked() {
    // Arrange
    let broker = MockBroker::new();
    let processor = Processor::builder(broker.clone(), "amqp://broker", "orders")
        .handler(|_shutdown, payload: Vec<u8>| async move {
            if !payload.is_empty() {
                panic!("unexpected payload");
            }
            Ok::<_, anyhow::Error>(())
        })
        .build()
        .unwrap();
    broker.publish("Not relevant");

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    assert!(result.is_ok());
    assert!(broker.acks().is_empty());
    assert_eq!(broker.calls().last(), Some(&BrokerCall::Close));
}

#[tokio::test]
async fn teardown_waits_for_in_flight_processing() {
    // Arrange
    let broker = MockBroker::new();
    let completed = Arc::new(AtomicBool::new(false));
    let processor = Processor::builder(broker.clone(), "amqp://broker", "orders")
        .handler({
            let completed = completed.clone();
            move |_shutdown: Arc<ShutdownHandler>, _payload: Vec<u8>| {
                let completed = completed.clone();
                async move {
                    // Take a long-ish time to process the message.
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    completed.store(true, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            }
        })
        .build()
        .unwrap();
    broker.publish("Not relevant");

    // Act
    processor.process(Arc::default()).await.unwrap();

    // Assert
    assert!(completed.load(Ordering::SeqCst));
    let ack = broker
        .position(|call| matches!(call, BrokerCall::Ack { .. }))
        .unwrap();
    let cancel = broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .unwrap();
    assert!(ack < cancel);
}

#[tokio::test]
async fn at_most_one_message_is_processed_per_call() {
    // Arrange
    let broker = MockBroker::new();
    let (processor, seen) = recording_processor(&broker);
    broker.publish("first");
    broker.publish("second");

    // Act
    processor.process(Arc::default()).await.unwrap();

    // Assert
    assert_eq!(*seen.lock().unwrap(), vec![b"first".to_vec()]);
    assert_eq!(broker.acks().len(), 1);
    assert_eq!(broker.queue_len(), 1);
}

#[tokio::test]
async fn a_shutdown_before_any_message_skips_processing() {
    // Arrange
    let broker = MockBroker::new();
    let (processor, seen) = recording_processor(&broker);
    let shutdown = Arc::new(ShutdownHandler::new());

    // Act
    let handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move { processor.process(shutdown).await }
    });
    shutdown_after(shutdown, Duration::from_millis(100));
    let result = handle.await.unwrap();

    // Assert
    assert!(result.is_ok());
    assert!(seen.lock().unwrap().is_empty());
    assert!(broker.acks().is_empty());
    let cancel = broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .unwrap();
    let close = broker
        .position(|call| matches!(call, BrokerCall::Close))
        .unwrap();
    assert!(cancel < close);
}

#[tokio::test]
async fn the_message_processor_can_observe_the_shutdown_signal() {
    // Arrange
    let broker = MockBroker::new();
    let interrupted = Arc::new(AtomicBool::new(false));
    let processor = Processor::builder(broker.clone(), "amqp://broker", "orders")
        .handler({
            let interrupted = interrupted.clone();
            move |shutdown: Arc<ShutdownHandler>, _payload: Vec<u8>| {
                let interrupted = interrupted.clone();
                async move {
                    shutdown.wait_for_signal().await;
                    interrupted.store(true, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("interrupted before completion"))
                }
            }
        })
        .build()
        .unwrap();
    broker.publish("Not relevant");
    let shutdown = Arc::new(ShutdownHandler::new());

    // Act
    shutdown_after(shutdown.clone(), Duration::from_millis(100));
    let result = processor.process(shutdown).await;

    // Assert
    assert!(result.is_ok());
    assert!(interrupted.load(Ordering::SeqCst));
    assert!(broker.acks().is_empty());
}

#[tokio::test]
async fn two_calls_never_share_a_consumer_tag() {
    // Arrange
    let broker = MockBroker::new();
    let (processor, _) = recording_processor(&broker);
    broker.publish("first");
    broker.publish("second");

    // Act
    processor.process(Arc::default()).await.unwrap();
    processor.process(Arc::default()).await.unwrap();

    // Assert
    let tags = broker.consumer_tags();
    assert_eq!(tags.len(), 2);
    assert_ne!(tags[0], tags[1]);
    assert_eq!(broker.acks().len(), 2);
}

#[tokio::test]
async fn a_delivery_stream_closed_by_the_broker_fails_the_call_after_teardown() {
    // Arrange
    let broker = MockBroker::failing(Failures {
        stream_closed: true,
        ..Default::default()
    });
    let (processor, seen) = recording_processor(&broker);
    broker.publish("Not relevant");

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    match result {
        Err(ProcessorError::DeliveryStream { queue, .. }) => assert_eq!(queue, "orders"),
        _ => panic!("expected a delivery stream error"),
    }
    assert!(seen.lock().unwrap().is_empty());
    assert!(broker.acks().is_empty());
    let cancel = broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .unwrap();
    let close = broker
        .position(|call| matches!(call, BrokerCall::Close))
        .unwrap();
    assert!(cancel < close);
}

#[tokio::test]
async fn a_delivery_stream_error_fails_the_call_after_teardown() {
    // Arrange
    let broker = MockBroker::failing(Failures {
        stream_error: true,
        ..Default::default()
    });
    let (processor, seen) = recording_processor(&broker);

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    match result {
        Err(ProcessorError::DeliveryStream { queue, source }) => {
            assert_eq!(queue, "orders");
            assert_eq!(
                source.to_string(),
                "CHANNEL_ERROR - channel closed by the broker"
            );
        }
        _ => panic!("expected a delivery stream error"),
    }
    assert!(seen.lock().unwrap().is_empty());
    let cancel = broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .unwrap();
    let close = broker
        .position(|call| matches!(call, BrokerCall::Close))
        .unwrap();
    assert!(cancel < close);
}

#[tokio::test]
async fn an_ack_failure_is_logged_and_does_not_fail_the_call() {
    // Arrange
    let broker = MockBroker::failing(Failures {
        ack: true,
        ..Default::default()
    });
    let (processor, seen) = recording_processor(&broker);
    broker.publish("Not relevant");

    // Act
    let result = processor.process(Arc::default()).await;

    // Assert
    assert!(result.is_ok());
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(broker.acks().len(), 1);
    let ack = broker
        .position(|call| matches!(call, BrokerCall::Ack { .. }))
        .unwrap();
    let cancel = broker
        .position(|call| matches!(call, BrokerCall::Cancel { .. }))
        .unwrap();
    let close = broker
        .position(|call| matches!(call, BrokerCall::Close))
        .unwrap();
    assert!(ack < cancel);
    assert!(cancel < close);
}
