use chrono::Utc;
use printsentry::telemetry::{read_frame, FRAME_SIZE};
use printsentry::{MotionSample, TelemetryBroadcaster, TelemetryFrame, TelemetryState};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout, Instant};
use tokio_util::sync::CancellationToken;

fn sample(x: f64, feed: f64) -> MotionSample {
    MotionSample {
        x,
        y: 0.0,
        z: 0.0,
        feed,
        extrusion: 0.0,
        timestamp: Utc::now(),
    }
}

async fn start_broadcaster(state: Arc<TelemetryState>) -> (SocketAddr, CancellationToken) {
    start_paced_broadcaster(state, Duration::from_millis(1)).await
}

async fn start_paced_broadcaster(
    state: Arc<TelemetryState>,
    frame_interval: Duration,
) -> (SocketAddr, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let broadcaster = TelemetryBroadcaster::new(state).with_frame_interval(frame_interval);
    let token = cancel.clone();
    tokio::spawn(async move { broadcaster.serve(listener, token).await });

    (addr, cancel)
}

async fn wait_for_clients(state: &TelemetryState, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while state.stats().connected_clients != expected {
        assert!(
            Instant::now() < deadline,
            "expected {} clients, have {}",
            expected,
            state.stats().connected_clients
        );
        sleep(Duration::from_millis(5)).await;
    }
}

async fn next_frame(stream: &mut TcpStream) -> TelemetryFrame {
    timeout(Duration::from_secs(5), read_frame(stream))
        .await
        .expect("frame timed out")
        .expect("frame decode failed")
        .expect("stream closed")
}

#[tokio::test]
async fn test_each_client_receives_frames_in_order() {
    let state = Arc::new(TelemetryState::default());
    state.append_sample(sample(0.0, 0.0));
    let (addr, cancel) = start_broadcaster(state.clone()).await;

    let mut a = TcpStream::connect(addr).await.unwrap();
    let mut b = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&state, 2).await;

    // No usable feed: one frame per sample
    for x in 1..=5 {
        state.append_sample(sample(x as f64, 0.0));
    }

    for client in [&mut a, &mut b] {
        let xs: Vec<f32> = {
            let mut xs = Vec::new();
            for _ in 0..5 {
                xs.push(next_frame(client).await.x);
            }
            xs
        };
        assert_eq!(xs, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    }

    cancel.cancel();
}

#[tokio::test]
async fn test_segment_is_interpolated_on_the_wire() {
    let state = Arc::new(TelemetryState::default());
    state.append_sample(sample(0.0, 600.0));
    let (addr, cancel) = start_broadcaster(state.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&state, 1).await;

    // 1 mm at 10 mm/s = 0.1 s -> 5 steps, 6 points
    state.append_sample(sample(1.0, 600.0));

    let mut xs = Vec::new();
    for _ in 0..6 {
        let frame = next_frame(&mut client).await;
        assert_eq!(frame.feed, 600.0);
        xs.push(frame.x);
    }
    let expected = [0.0f32, 0.2, 0.4, 0.6, 0.8, 1.0];
    for (got, want) in xs.iter().zip(expected) {
        assert!((got - want).abs() < 1e-6, "got {:?}", xs);
    }

    cancel.cancel();
}

#[tokio::test]
async fn test_raw_frame_layout() {
    let state = Arc::new(TelemetryState::default());
    let (addr, cancel) = start_broadcaster(state.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&state, 1).await;
    state.append_sample(MotionSample {
        x: 1.5,
        y: -2.25,
        z: 0.0,
        feed: 1200.0,
        extrusion: 0.1,
        timestamp: Utc::now(),
    });

    let mut raw = [0u8; FRAME_SIZE];
    timeout(Duration::from_secs(5), client.read_exact(&mut raw))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(&raw[0..3], b"CRD");
    assert_eq!(raw[3], 5);
    let frame = TelemetryFrame::decode(&raw).unwrap();
    assert_eq!(
        (frame.x, frame.y, frame.z, frame.feed, frame.extrusion),
        (1.5, -2.25, 0.0, 1200.0, 0.1f64 as f32)
    );

    cancel.cancel();
}

#[tokio::test]
async fn test_disconnect_does_not_affect_other_clients() {
    let interval = Duration::from_millis(5);
    let state = Arc::new(TelemetryState::default());
    state.append_sample(sample(0.0, 0.0));
    let (addr, cancel) = start_paced_broadcaster(state.clone(), interval).await;

    let mut leaving = TcpStream::connect(addr).await.unwrap();
    let mut staying = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&state, 2).await;

    state.append_sample(sample(1.0, 0.0));
    assert_eq!(next_frame(&mut leaving).await.x, 1.0);
    assert_eq!(next_frame(&mut staying).await.x, 1.0);

    drop(leaving);

    let started = Instant::now();
    for x in 2..=40 {
        state.append_sample(sample(x as f64, 0.0));
    }

    let mut arrivals = Vec::new();
    for x in 2..=40 {
        assert_eq!(next_frame(&mut staying).await.x, x as f32);
        arrivals.push(Instant::now());
    }

    // 39 frames with a pause after each: the last one cannot leave before 38
    // intervals have passed, and nothing stalls the stream in between
    let elapsed = arrivals[arrivals.len() - 1] - started;
    assert!(elapsed >= interval * 38, "stream ran ahead of pacing: {:?}", elapsed);
    assert!(
        elapsed < interval * 38 + Duration::from_secs(1),
        "stream slowed down: {:?}",
        elapsed
    );
    let slowest = arrivals
        .windows(2)
        .map(|w| w[1] - w[0])
        .max()
        .unwrap();
    assert!(slowest < Duration::from_millis(250), "frame gap {:?}", slowest);

    wait_for_clients(&state, 1).await;

    state.append_sample(sample(41.0, 0.0));
    assert_eq!(next_frame(&mut staying).await.x, 41.0);

    cancel.cancel();
}

#[tokio::test]
async fn test_late_client_starts_from_current_position() {
    let state = Arc::new(TelemetryState::default());
    for x in 0..10 {
        state.append_sample(sample(x as f64, 0.0));
    }
    let (addr, cancel) = start_broadcaster(state.clone()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    wait_for_clients(&state, 1).await;

    state.append_sample(sample(100.0, 0.0));
    assert_eq!(next_frame(&mut client).await.x, 100.0);

    cancel.cancel();
}
