use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use redisq::error::{Error, Result};
use redisq::model::Envelope;
use redisq::receiver::{
    LazyCompositeTransport, LoggingTransport, MessageHandler, Receiver, ReceiverState,
    RetryForeverReceiver, RetryPolicy, Sender,
};
use redisq::store::MemoryStore;
use redisq::transport::{QueueReceiver, Transport};
use tokio_util::sync::CancellationToken;

fn transport(queue: &str) -> Arc<Transport<MemoryStore>> {
    Arc::new(
        Transport::new(MemoryStore::new(), queue)
            .blocking_timeout(Duration::from_millis(50))
            .poll_interval(Duration::from_millis(5)),
    )
}

/// Records bodies; fails the first `failures` calls.
#[derive(Default)]
struct RecordingHandler {
    failures: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl RecordingHandler {
    fn failing(times: usize) -> Self {
        Self {
            failures: AtomicUsize::new(times),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn handle(&self, envelope: &Envelope) -> anyhow::Result<()> {
        self.seen
            .lock()
            .push(String::from_utf8_lossy(envelope.body()).into_owned());
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("handler failure {remaining}");
        }
        Ok(())
    }
}

/// A receiver that fails every iteration with a fixed error.
struct FailingReceiver {
    error: fn() -> Error,
    calls: AtomicUsize,
    stops: AtomicUsize,
}

impl FailingReceiver {
    fn new(error: fn() -> Error) -> Self {
        Self {
            error,
            calls: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Receiver for FailingReceiver {
    async fn receive(&self, _: Arc<dyn MessageHandler>, _: &CancellationToken) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        Err((self.error)())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

#[tokio::test]
async fn queue_receiver_acks_handled_messages() {
    let transport = transport("recv-ack");
    transport.send(Envelope::new("hello")).await.unwrap();

    let handler = Arc::new(RecordingHandler::default());
    let receiver = QueueReceiver::new(Arc::clone(&transport));
    receiver
        .receive(handler.clone(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(handler.seen(), vec!["hello".to_string()]);
    let stats = transport.stats().await.unwrap();
    assert_eq!(stats.ready + stats.processing + stats.delayed, 0);
}

#[tokio::test]
async fn queue_receiver_rejects_on_handler_failure() {
    let transport = transport("recv-reject");
    transport.send(Envelope::new("boom")).await.unwrap();

    let receiver = QueueReceiver::new(Arc::clone(&transport));
    let err = receiver
        .receive(
            Arc::new(RecordingHandler::failing(1)),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Handler(ref msg) if msg.contains("handler failure")));
    let stats = transport.stats().await.unwrap();
    assert_eq!(stats.processing, 0);
    assert_eq!(stats.ready, 1);
}

#[tokio::test]
async fn queue_receiver_returns_when_idle() {
    let transport = transport("recv-idle");
    let handler = Arc::new(RecordingHandler::default());
    QueueReceiver::new(transport)
        .receive(handler.clone(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(handler.seen().is_empty());
}

#[tokio::test]
async fn stopped_queue_receiver_takes_nothing() {
    let transport = transport("recv-stopped");
    transport.send(Envelope::new("untouched")).await.unwrap();

    let receiver = QueueReceiver::new(Arc::clone(&transport));
    receiver.stop().await;
    receiver
        .receive(Arc::new(RecordingHandler::default()), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(transport.stats().await.unwrap().ready, 1);
}

#[tokio::test]
async fn retry_forever_redelivers_after_handler_failures() {
    let transport = transport("retry-redeliver");
    transport.send(Envelope::new("flaky")).await.unwrap();

    let handler = Arc::new(RecordingHandler::failing(2));
    let receiver = Arc::new(
        RetryForeverReceiver::new(Arc::new(QueueReceiver::new(Arc::clone(&transport))))
            .error_backoff(Duration::from_millis(1)),
    );
    let cancel = CancellationToken::new();

    let task = {
        let receiver = Arc::clone(&receiver);
        let handler = handler.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move { receiver.receive(handler, &cancel).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while handler.seen().len() < 3 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("message should be redelivered until it succeeds");

    cancel.cancel();
    task.await.unwrap().unwrap();

    assert_eq!(handler.seen(), vec!["flaky"; 3]);
    let stats = transport.stats().await.unwrap();
    assert_eq!(stats.ready + stats.processing + stats.delayed, 0);
}

#[tokio::test]
async fn retry_forever_swallows_errors_until_cancelled() {
    let inner = Arc::new(FailingReceiver::new(|| Error::Transport("down".into())));
    let receiver = Arc::new(
        RetryForeverReceiver::new(inner.clone()).error_backoff(Duration::from_millis(1)),
    );
    let cancel = CancellationToken::new();

    let task = {
        let receiver = Arc::clone(&receiver);
        let cancel = cancel.clone();
        tokio::spawn(async move {
            receiver
                .receive(Arc::new(RecordingHandler::default()), &cancel)
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while inner.calls.load(Ordering::SeqCst) < 3 {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("failed iterations should be retried");

    cancel.cancel();
    task.await.unwrap().unwrap();
    assert_eq!(receiver.state(), ReceiverState::Running);
}

#[tokio::test]
async fn retry_forever_propagates_unretryable_errors() {
    let inner = Arc::new(FailingReceiver::new(|| Error::Config("bad dsn".into())));
    let receiver = RetryForeverReceiver::new(inner.clone()).with_policy(RetryPolicy::TransientOnly);

    let err = receiver
        .receive(Arc::new(RecordingHandler::default()), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Config(_)));
    assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn retry_forever_stop_propagates_and_ends_the_loop() {
    let inner = Arc::new(FailingReceiver::new(|| Error::Transport("down".into())));
    let receiver = RetryForeverReceiver::new(inner.clone());

    receiver.stop().await;
    assert_eq!(receiver.state(), ReceiverState::Stopped);
    assert_eq!(inner.stops.load(Ordering::SeqCst), 1);

    receiver
        .receive(Arc::new(RecordingHandler::default()), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(inner.calls.load(Ordering::SeqCst), 0);
}

struct CountingSender {
    sent: AtomicUsize,
}

#[async_trait]
impl Sender for CountingSender {
    async fn send(&self, envelope: Envelope) -> Result<Envelope> {
        self.sent.fetch_add(1, Ordering::SeqCst);
        Ok(envelope)
    }
}

#[tokio::test]
async fn lazy_transport_builds_each_side_once_on_demand() {
    let receivers_built = Arc::new(AtomicUsize::new(0));
    let senders_built = Arc::new(AtomicUsize::new(0));
    let sender = Arc::new(CountingSender {
        sent: AtomicUsize::new(0),
    });

    let lazy = {
        let receivers_built = Arc::clone(&receivers_built);
        let senders_built = Arc::clone(&senders_built);
        let sender = Arc::clone(&sender);
        LazyCompositeTransport::new(
            move || {
                receivers_built.fetch_add(1, Ordering::SeqCst);
                let receiver: Arc<dyn Receiver> =
                    Arc::new(FailingReceiver::new(|| Error::Transport("x".into())));
                Ok(receiver)
            },
            move || {
                senders_built.fetch_add(1, Ordering::SeqCst);
                let sender: Arc<dyn Sender> = sender.clone();
                Ok(sender)
            },
        )
    };

    lazy.send(Envelope::new("one")).await.unwrap();
    lazy.send(Envelope::new("two")).await.unwrap();
    assert_eq!(senders_built.load(Ordering::SeqCst), 1);
    assert_eq!(sender.sent.load(Ordering::SeqCst), 2);

    // Stopping before any receive does not build the receiver.
    lazy.stop().await;
    assert!(!lazy.receiver_initialized());
    assert_eq!(receivers_built.load(Ordering::SeqCst), 0);

    let _ = lazy
        .receive(Arc::new(RecordingHandler::default()), &CancellationToken::new())
        .await;
    let _ = lazy
        .receive(Arc::new(RecordingHandler::default()), &CancellationToken::new())
        .await;
    assert_eq!(receivers_built.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn lazy_transport_retries_a_failed_construction() {
    let attempts = Arc::new(AtomicUsize::new(0));
    let lazy = {
        let attempts = Arc::clone(&attempts);
        LazyCompositeTransport::new(
            || Err(Error::Config("unused".into())),
            move || {
                if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(Error::Config("not yet".into()));
                }
                let sender: Arc<dyn Sender> = Arc::new(CountingSender {
                    sent: AtomicUsize::new(0),
                });
                Ok(sender)
            },
        )
    };

    assert!(lazy.send(Envelope::new("first")).await.is_err());
    assert!(!lazy.sender_initialized());
    lazy.send(Envelope::new("second")).await.unwrap();
    assert!(lazy.sender_initialized());
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn logging_transport_passes_through() {
    let transport = transport("logging");
    let logged = LoggingTransport::new(Arc::clone(&transport));
    logged.send(Envelope::new("logged")).await.unwrap();

    let receiver = LoggingTransport::new(QueueReceiver::new(Arc::clone(&transport)));
    let handler = Arc::new(RecordingHandler::default());
    receiver
        .receive(handler.clone(), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(handler.seen(), vec!["logged".to_string()]);
}
