//! Integration tests for the softplayer playback pipeline
//!
//! These tests drive the complete controller with generated YUV4MPEG2
//! streams and verify:
//! - Playback to end of stream, pacing and geometry reporting
//! - Pause/resume without frame loss
//! - Error reporting and state after failures
//! - Stop/destroy liveness, idempotence and resource cleanup

use anyhow::Result;
use parking_lot::Mutex;
use serial_test::serial;
use softplayer::player::{PlaybackController, PlayerEvent, PlayerState, TeardownReport};
use softplayer::stream::{ByteStreamSource, FileOpener, MemoryOpener};
use softplayer::utils::{Config, DecodeCause, PlayerError};
use softplayer_integration_tests::perf_test::IntervalStats;
use softplayer_integration_tests::recording::RecordingPresenter;
use softplayer_integration_tests::{y4m, TestFixture};
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const LONG: Duration = Duration::from_secs(10);

fn test_config() -> Config {
    let mut config = Config::default();
    config.playback.wait_timeout_ms = 20;
    config
}

type Errors = Arc<Mutex<Vec<PlayerError>>>;

fn error_sink() -> (Errors, impl FnMut(PlayerError) + Send + 'static) {
    let errors: Errors = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&errors);
    (errors, move |e| sink.lock().push(e))
}

fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}

#[test]
#[serial]
fn test_file_plays_to_end_at_picture_rate() -> Result<()> {
    let fixture = TestFixture::new()?;
    let presenter = RecordingPresenter::new();
    let (errors, on_error) = error_sink();
    let events = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&events);

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(FileOpener::new(&fixture.media_files.small_25fps, 1000))
        .with_presenter(presenter.clone())
        .with_event_handler(move |event: PlayerEvent| recorded.lock().push(event))
        .on_error(on_error)
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    assert_eq!(presenter.indices(), (0..12).collect::<Vec<u64>>());
    assert_eq!(presenter.sizes(), vec![(64, 48, 64, 48)]);
    assert!(presenter.shown().iter().all(|s| s.geometry == (64, 48, 64, 48)));
    assert_eq!(presenter.shown()[0].first_pixel, [0, 0, 0, 255]);
    assert!(errors.lock().is_empty());

    // 25 fps means at least 40ms between presentations
    let intervals = IntervalStats::from_times(&presenter.times());
    intervals.report("25 fps file");
    assert!(intervals.min().unwrap() >= Duration::from_millis(39));

    let events = events.lock();
    assert!(events.iter().any(|e| matches!(e, PlayerEvent::EndOfStream)));
    assert!(events
        .iter()
        .any(|e| matches!(e, PlayerEvent::SequenceStarted { header } if header.width == 64 && header.height == 48)));

    let stats = player.stats();
    assert_eq!(stats.frames_presented, 12);
    assert_eq!(stats.picture_rate, Some(25.0));
    assert!(stats.buffer.max_allocated <= 2);
    assert!(stats.buffer.max_occupancy <= 1);
    assert!(stats.buffer.buffers_reused > 0);
    Ok(())
}

#[test]
#[serial]
fn test_geometry_and_rate_change_mid_stream() -> Result<()> {
    let fixture = TestFixture::new()?;
    let presenter = RecordingPresenter::new();

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(FileOpener::new(&fixture.media_files.size_change, 777))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    assert_eq!(presenter.indices(), (0..6).collect::<Vec<u64>>());
    assert_eq!(presenter.sizes(), vec![(100, 50, 112, 64), (40, 30, 48, 32)]);

    let stats = player.stats();
    assert_eq!(stats.picture_rate, Some(50.0));
    assert_eq!(stats.geometry, Some((40, 30, 48, 32)));
    Ok(())
}

#[test]
#[serial]
fn test_pacing_follows_rate_change() -> Result<()> {
    let mut data = y4m::stream(32, 32, "10:1", 6);
    data.extend(y4m::stream(32, 32, "100:1", 6));
    let presenter = RecordingPresenter::new();

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(MemoryOpener::new(data, 4096))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    let times = presenter.times();
    assert_eq!(times.len(), 12);
    let intervals: Vec<Duration> = times.windows(2).map(|w| w[1].duration_since(w[0])).collect();

    // the decoder runs at most two frames ahead, so the early frames keep the 10 fps pacing
    for interval in &intervals[..3] {
        assert!(*interval >= Duration::from_millis(95), "{:?}", intervals);
    }

    let fast = IntervalStats::from_times(&times[7..]);
    fast.report("after switch to 100 fps");
    assert!(fast.average() < Duration::from_millis(50), "{:?}", intervals);
    Ok(())
}

#[test]
#[serial]
fn test_pause_freezes_and_resume_loses_nothing() -> Result<()> {
    let presenter = RecordingPresenter::new();
    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(MemoryOpener::new(y4m::stream(32, 32, "25:1", 15), 512))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(wait_until(LONG, || presenter.count() >= 3));

    player.pause()?;
    assert_eq!(player.state(), PlayerState::Paused);
    thread::sleep(Duration::from_millis(100));
    let frozen = presenter.count();
    thread::sleep(Duration::from_millis(300));
    assert_eq!(presenter.count(), frozen, "frames delivered while paused");

    player.resume()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    assert_eq!(presenter.indices(), (0..15).collect::<Vec<u64>>());
    Ok(())
}

#[test]
#[serial]
fn test_corrupt_stream_reports_one_decode_error() -> Result<()> {
    let fixture = TestFixture::new()?;
    let presenter = RecordingPresenter::new();
    let (errors, on_error) = error_sink();

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(FileOpener::new(&fixture.media_files.corrupt, 64))
        .with_presenter(presenter.clone())
        .on_error(on_error)
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    thread::sleep(Duration::from_millis(100));

    let expected_offset = y4m::picture_offset(16, 16, "100:1", 2);
    {
        let errors = errors.lock();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].offset(), Some(expected_offset));
        assert!(matches!(
            &errors[0],
            PlayerError::Decode { cause: DecodeCause::UnexpectedToken(token), .. } if token == "NOTAFRAME"
        ));
    }

    let shown = presenter.count();
    assert!(shown <= 2);
    thread::sleep(Duration::from_millis(200));
    assert_eq!(presenter.count(), shown);
    assert_eq!(player.state(), PlayerState::Stopped);
    assert_eq!(player.stats().errors, 1);

    player.stop()?;
    assert_eq!(errors.lock().len(), 1);
    Ok(())
}

/// Serves part of a stream, then fails like a dropped connection
struct DroppingSource {
    data: Vec<u8>,
    served: bool,
}

impl ByteStreamSource for DroppingSource {
    fn read(&mut self) -> io::Result<Option<Vec<u8>>> {
        if self.served {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        self.served = true;
        Ok(Some(std::mem::take(&mut self.data)))
    }
}

#[test]
#[serial]
fn test_stream_failure_mid_playback() -> Result<()> {
    let mut data = y4m::stream(8, 8, "100:1", 2);
    data.truncate(data.len() - 10);

    let presenter = RecordingPresenter::new();
    let (errors, on_error) = error_sink();
    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(move || -> softplayer::Result<Box<dyn ByteStreamSource>> {
            Ok(Box::new(DroppingSource {
                data: data.clone(),
                served: false,
            }))
        })
        .with_presenter(presenter.clone())
        .on_error(on_error)
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    let errors = errors.lock();
    assert_eq!(errors.len(), 1);
    assert!(matches!(errors[0], PlayerError::Stream(_)));
    assert_eq!(presenter.indices(), vec![0]);
    Ok(())
}

#[test]
#[serial]
fn test_stop_is_prompt_wherever_threads_are_parked() -> Result<()> {
    // 1 fps keeps the presenter in its pacing wait and the decoder parked on
    // a full buffer
    let make = || {
        PlaybackController::builder()
            .with_config(test_config())
            .with_source(MemoryOpener::new(y4m::stream(16, 16, "1:1", 50), 256))
            .build()
    };

    let player = make()?;
    player.play()?;
    assert!(player.wait_for_state(PlayerState::Playing, LONG));
    thread::sleep(Duration::from_millis(100));
    let started = Instant::now();
    player.stop()?;
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(player.state(), PlayerState::Stopped);

    let player = make()?;
    player.play()?;
    assert!(player.wait_for_state(PlayerState::Playing, LONG));
    player.pause()?;
    thread::sleep(Duration::from_millis(50));
    let started = Instant::now();
    player.stop()?;
    assert!(started.elapsed() < Duration::from_secs(1));

    // the pool is fully released once the session is gone
    let stats = player.buffer_stats();
    assert_eq!(stats.allocated, 0);
    assert_eq!(stats.pooled, 0);
    assert_eq!(stats.occupancy, 0);
    Ok(())
}

#[test]
#[serial]
fn test_stop_and_destroy_are_idempotent() -> Result<()> {
    let reports = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&reports);

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(MemoryOpener::new(y4m::stream(16, 16, "30:1", 100), 256))
        .with_teardown_watcher(move |report: &TeardownReport| recorded.lock().push(*report))
        .build()?;

    // nothing to stop yet
    player.stop()?;
    assert_eq!(player.state(), PlayerState::Idle);

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Playing, LONG));
    player.stop()?;
    player.stop()?;
    assert_eq!(player.state(), PlayerState::Stopped);

    player.destroy();
    player.destroy();
    player.stop()?;
    drop(player);

    let reports = reports.lock();
    assert_eq!(reports.len(), 1);
    assert!(reports[0].is_clean(), "{:?}", reports[0]);
    Ok(())
}

#[test]
#[serial]
fn test_destroyed_player_rejects_everything_but_teardown() -> Result<()> {
    let player = PlaybackController::builder()
        .with_source(MemoryOpener::new(y4m::stream(16, 16, "30:1", 2), 256))
        .build()?;

    player.destroy();
    assert_eq!(player.state(), PlayerState::Destroyed);

    for result in [player.play(), player.pause(), player.resume()] {
        assert!(matches!(
            result,
            Err(PlayerError::InvalidTransition { from: PlayerState::Destroyed, .. })
        ));
    }
    assert!(player.stop().is_ok());
    assert_eq!(player.state(), PlayerState::Destroyed);
    Ok(())
}

#[test]
#[serial]
fn test_restart_after_stop_keeps_indices_contiguous() -> Result<()> {
    let presenter = RecordingPresenter::new();
    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(MemoryOpener::new(y4m::stream(16, 16, "100:1", 40), 256))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(wait_until(LONG, || presenter.count() >= 5));
    player.stop()?;
    let first_run = presenter.count();

    player.play()?;
    assert!(wait_until(LONG, || presenter.count() >= first_run + 5));
    player.stop()?;

    let indices = presenter.indices();
    assert!(indices.windows(2).all(|w| w[1] == w[0] + 1), "{:?}", indices);
    assert_eq!(player.stats().sessions, 2);
    Ok(())
}

#[test]
#[serial]
fn test_loop_playback_reopens_the_stream() -> Result<()> {
    let mut config = test_config();
    config.playback.loop_playback = true;

    let presenter = RecordingPresenter::new();
    let player = PlaybackController::builder()
        .with_config(config)
        .with_source(MemoryOpener::new(y4m::stream(8, 8, "200:1", 3), 64))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(wait_until(LONG, || presenter.count() >= 10));
    assert_eq!(player.state(), PlayerState::Playing);
    player.stop()?;

    let indices = presenter.indices();
    assert_eq!(indices, (0..indices.len() as u64).collect::<Vec<u64>>());
    // luma cycles with the clip
    let shown = presenter.shown();
    assert_eq!(shown[0].first_pixel, shown[3].first_pixel);
    Ok(())
}

#[test]
#[serial]
fn test_config_file_sizes_the_buffer() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        "[playback]\nbuffer_capacity = 3\npool_size = 4\nwait_timeout_ms = 10\n",
    )?;

    let config = Config::load_from(&path)?;
    let presenter = RecordingPresenter::new();
    let player = PlaybackController::builder()
        .with_config(config)
        .with_source(MemoryOpener::new(y4m::stream(8, 8, "100:1", 10), 64))
        .with_presenter(presenter.clone())
        .build()?;

    player.play()?;
    assert!(player.wait_for_state(PlayerState::Stopped, LONG));
    player.stop()?;

    let stats = player.buffer_stats();
    assert_eq!(stats.capacity, 3);
    assert_eq!(stats.pool_limit, 4);
    assert!(stats.max_occupancy <= 3);
    assert!(stats.max_allocated <= 4);
    assert_eq!(presenter.count(), 10);
    Ok(())
}

#[tokio::test]
#[serial]
async fn test_events_reach_an_async_consumer() -> Result<()> {
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let player = PlaybackController::builder()
        .with_config(test_config())
        .with_source(MemoryOpener::new(y4m::stream(8, 8, "100:1", 4), 64))
        .with_event_handler(move |event: PlayerEvent| {
            let _ = tx.send(event);
        })
        .build()?;

    player.play()?;

    let mut transitions = Vec::new();
    let deadline = tokio::time::Instant::now() + LONG;
    loop {
        let event = tokio::time::timeout_at(deadline, rx.recv()).await?;
        match event {
            Some(PlayerEvent::StateChanged { from, to }) => transitions.push((from, to)),
            Some(PlayerEvent::EndOfStream) => break,
            Some(_) => {}
            None => anyhow::bail!("event channel closed"),
        }
    }

    assert_eq!(
        transitions,
        vec![
            (PlayerState::Idle, PlayerState::Loading),
            (PlayerState::Loading, PlayerState::Playing),
            (PlayerState::Playing, PlayerState::Stopped),
        ]
    );

    player.destroy();
    Ok(())
}
