use span_forwarder::{
    Forwarder, ForwarderConfig, ForwarderError, METRIC_QUEUE_DUMPED, METRIC_RESPONSE_ERROR, METRIC_SEEN,
    METRIC_SENT, SenderError, SpanBatch, SpanSender, StatusCode, StreamFailure, StreamOptions,
};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};

#[derive(Default)]
struct Recording {
    connect_results: VecDeque<Result<(), StreamFailure>>,
    /// Every `connect` call waits forever.
    hang_on_connect: bool,
    connects: usize,
    clones: usize,
    shutdowns: Vec<usize>,
    delivered: Vec<(usize, u64, Vec<u8>)>,
}

/// Test sender that records deliveries per instance.
struct RecordingSender {
    id: usize,
    recording: Arc<Mutex<Recording>>,
}

impl RecordingSender {
    fn new() -> (Self, Arc<Mutex<Recording>>) {
        let recording = Arc::new(Mutex::new(Recording::default()));
        let sender = Self {
            id: 0,
            recording: Arc::clone(&recording),
        };
        (sender, recording)
    }
}

// Rust 2024: native async fn in traits
impl SpanSender for RecordingSender {
    async fn connect(&mut self) -> Result<(), StreamFailure> {
        let (hang, result) = {
            let mut recording = self.recording.lock().unwrap();
            recording.connects += 1;
            let result = recording.connect_results.pop_front().unwrap_or(Ok(()));
            (recording.hang_on_connect, result)
        };
        if hang {
            std::future::pending::<()>().await;
        }
        result
    }

    async fn send(&mut self, batch: SpanBatch) -> Result<(), StreamFailure> {
        let count = batch.count();
        self.recording
            .lock()
            .unwrap()
            .delivered
            .push((self.id, count, batch.into_payload()));
        Ok(())
    }

    fn take_responses(&mut self) -> Option<mpsc::Receiver<StreamFailure>> {
        None
    }

    async fn shutdown(&mut self) {
        self.recording.lock().unwrap().shutdowns.push(self.id);
    }

    fn clone_sender(&self) -> Result<Self, SenderError> {
        let mut recording = self.recording.lock().unwrap();
        recording.clones += 1;
        Ok(Self {
            id: recording.clones,
            recording: Arc::clone(&self.recording),
        })
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn options(queue_size: u64) -> StreamOptions {
    StreamOptions::default()
        .with_queue_size(queue_size)
        .with_backoff(Duration::from_millis(10))
}

fn status(code: StatusCode) -> Result<(), StreamFailure> {
    Err(StreamFailure::from_status(code, "test"))
}

fn lock(recording: &Arc<Mutex<Recording>>) -> MutexGuard<'_, Recording> {
    recording.lock().unwrap()
}

/// Polls `condition` until it holds or a second has passed.
async fn eventually(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(1), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .expect("condition not reached within 1s");
}

#[tokio::test]
async fn test_three_batches_streamed_in_order() {
    let (sender, recording) = RecordingSender::new();
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();

    forwarder.enqueue(3, b"first".to_vec());
    forwarder.enqueue(3, b"second".to_vec());
    forwarder.enqueue(3, b"third".to_vec());

    eventually(|| lock(&recording).delivered.len() == 3).await;
    let payloads: Vec<Vec<u8>> = lock(&recording)
        .delivered
        .iter()
        .map(|(_, _, payload)| payload.clone())
        .collect();
    assert_eq!(payloads, vec![b"first".to_vec(), b"second".to_vec(), b"third".to_vec()]);

    let metrics = forwarder.dump_metrics().await.unwrap();
    assert_eq!(metrics[METRIC_SENT], 9.0);
    assert_eq!(metrics[METRIC_SEEN], 9.0);
    assert!(!metrics.contains_key(METRIC_QUEUE_DUMPED));

    forwarder.shutdown(Duration::from_secs(1)).await.unwrap();
    assert!(forwarder.is_complete());
    assert_eq!(lock(&recording).shutdowns, vec![0]);
}

#[tokio::test]
async fn test_unimplemented_on_connect_stops_forwarding() {
    let (sender, recording) = RecordingSender::new();
    lock(&recording)
        .connect_results
        .push_back(status(StatusCode::Unimplemented));
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();

    eventually(|| forwarder.is_complete()).await;
    assert_eq!(lock(&recording).connects, 1);
    assert_eq!(lock(&recording).shutdowns, vec![0]);

    let metrics = forwarder.dump_metrics().await.unwrap();
    assert_eq!(metrics[METRIC_RESPONSE_ERROR], 1.0);
    assert_eq!(metrics["Supportability/InfiniteTracing/Span/gRPC/UNIMPLEMENTED"], 1.0);
    assert_eq!(metrics[METRIC_SENT], 0.0);

    // Producers are never held up once the stream is gone.
    for i in 0..1_000 {
        forwarder.enqueue(50, vec![i as u8]);
    }
    assert!(lock(&recording).delivered.is_empty());
    forwarder.shutdown(Duration::from_millis(10)).await.unwrap();
}

#[tokio::test]
async fn test_reconnect_twice_then_stream_on_fresh_sender() {
    let (sender, recording) = RecordingSender::new();
    lock(&recording).connect_results.extend([
        status(StatusCode::FailedPrecondition),
        status(StatusCode::FailedPrecondition),
    ]);
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();

    forwarder.enqueue(5, b"batch".to_vec());
    eventually(|| lock(&recording).delivered.len() == 1).await;

    {
        let recording = lock(&recording);
        assert_eq!(recording.clones, 2);
        assert_eq!(recording.connects, 3);
        assert_eq!(recording.shutdowns, vec![0, 1]);
        assert_eq!(recording.delivered, vec![(2, 5, b"batch".to_vec())]);
    }

    let metrics = forwarder.dump_metrics().await.unwrap();
    assert_eq!(metrics[METRIC_RESPONSE_ERROR], 2.0);
    assert_eq!(metrics["Supportability/InfiniteTracing/Span/gRPC/FAILED_PRECONDITION"], 2.0);
    assert_eq!(metrics[METRIC_SENT], 5.0);

    forwarder.shutdown(Duration::from_secs(1)).await.unwrap();
    assert_eq!(lock(&recording).shutdowns, vec![0, 1, 2]);
}

#[tokio::test]
async fn test_flushes_are_counted_as_dumped_spans() {
    let (sender, recording) = RecordingSender::new();
    lock(&recording).hang_on_connect = true;
    let forwarder = Forwarder::start_with_sender(sender, options(10)).unwrap();

    forwarder.enqueue(4, vec![1]);
    forwarder.enqueue(4, vec![2]);
    forwarder.enqueue(4, vec![3]); // flushes 8
    forwarder.enqueue(6, vec![4]);
    forwarder.enqueue(1, vec![5]); // flushes 10
    assert_eq!(forwarder.remaining_capacity(), 9);

    let metrics = forwarder.dump_metrics().await.unwrap();
    assert_eq!(metrics[METRIC_QUEUE_DUMPED], 18.0);
    assert_eq!(metrics[METRIC_SEEN], 19.0);
    assert_eq!(metrics[METRIC_SENT], 0.0);
}

#[tokio::test]
async fn test_shutdown_times_out_on_hung_transport() {
    let (sender, recording) = RecordingSender::new();
    lock(&recording).hang_on_connect = true;
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();
    forwarder.enqueue(7, vec![0]);
    // The worker must be inside the hanging connect before shutdown is requested.
    eventually(|| lock(&recording).connects == 1).await;

    let result = forwarder.shutdown(Duration::from_millis(20)).await;
    assert!(matches!(result, Err(ForwarderError::ShutdownTimeout(_))));
    assert!(!forwarder.is_complete());

    // The queue was closed regardless: capacity is back and nothing new is taken.
    assert_eq!(forwarder.remaining_capacity(), 100);
    forwarder.enqueue(7, vec![1]);
    assert_eq!(forwarder.remaining_capacity(), 100);
    assert!(!forwarder.dump_metrics().await.unwrap().contains_key(METRIC_QUEUE_DUMPED));
}

#[tokio::test]
async fn test_repeated_and_concurrent_shutdown() {
    let (sender, recording) = RecordingSender::new();
    let forwarder = Arc::new(Forwarder::start_with_sender(sender, options(100)).unwrap());
    eventually(|| lock(&recording).connects == 1).await;

    let mut waiters = Vec::new();
    for _ in 0..4 {
        let forwarder = Arc::clone(&forwarder);
        waiters.push(tokio::spawn(async move {
            forwarder.shutdown(Duration::from_secs(1)).await
        }));
    }
    for waiter in waiters {
        waiter.await.unwrap().unwrap();
    }
    forwarder.shutdown(Duration::from_secs(1)).await.unwrap();

    assert!(forwarder.is_complete());
    assert_eq!(lock(&recording).shutdowns, vec![0]);
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_dropped() {
    let (sender, recording) = RecordingSender::new();
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();
    forwarder.shutdown(Duration::from_secs(1)).await.unwrap();

    forwarder.enqueue(3, vec![1, 2, 3]);
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(lock(&recording).delivered.is_empty());
    let metrics = forwarder.dump_metrics().await.unwrap();
    assert!(!metrics.contains_key(METRIC_SEEN));
}

#[tokio::test]
async fn test_dumps_reset_between_calls() {
    let (sender, recording) = RecordingSender::new();
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();
    forwarder.enqueue(2, vec![0]);
    eventually(|| lock(&recording).delivered.len() == 1).await;

    let first = forwarder.dump_metrics().await.unwrap();
    assert_eq!(first[METRIC_SENT], 2.0);

    for _ in 0..2 {
        let next = forwarder.dump_metrics().await.unwrap();
        assert_eq!(next.len(), 1);
        assert_eq!(next[METRIC_SENT], 0.0);
    }
}

#[tokio::test]
async fn test_application_shutdown_ends_metrics() {
    let (sender, _recording) = RecordingSender::new();
    let forwarder = Forwarder::start_with_sender(sender, options(100)).unwrap();
    assert!(forwarder.dump_metrics().await.is_some());

    forwarder.request_application_shutdown();
    assert!(forwarder.dump_metrics().await.is_none());

    // Application shutdown also stops the stream.
    eventually(|| forwarder.is_complete()).await;
    forwarder.enqueue(1, vec![0]);
    assert_eq!(forwarder.remaining_capacity(), 100);
}

#[tokio::test]
async fn test_stalled_ingest_does_not_block_shutdown() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    // Accepts every connection, reads the handshake, then never reads again.
    let (release, held) = oneshot::channel::<()>();
    tokio::spawn(async move {
        let accept = async move {
            let mut sockets = Vec::new();
            while let Ok((mut socket, _)) = listener.accept().await {
                let len = socket.read_u32().await.unwrap() as usize;
                let mut handshake = vec![0; len];
                socket.read_exact(&mut handshake).await.unwrap();
                sockets.push(socket);
            }
        };
        tokio::select! {
            () = accept => {}
            _ = held => {}
        }
    });

    let config = ForwarderConfig::new("127.0.0.1", port, "license-key", "run-1")
        .with_queue_size(1_000)
        .with_write_timeout(Duration::from_millis(200))
        .with_shutdown_grace(Duration::from_millis(100))
        .with_backoff(Duration::from_secs(15));
    let forwarder = Forwarder::start(config).unwrap();
    for _ in 0..8 {
        forwarder.enqueue(1, vec![0; 8 * 1024 * 1024]);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    forwarder.shutdown(Duration::from_secs(2)).await.unwrap();
    assert!(forwarder.is_complete());
    let _ = release.send(());
}
