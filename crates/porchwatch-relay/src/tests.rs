use std::{
    collections::HashSet,
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use porchwatch_types::{config::RelayConfig, telemetry::RelayState, vision::Frame, Result};
use tokio::sync::Semaphore;

use crate::{launch_error, relay_error, LiveRelay, TranscoderLauncher, TranscoderParams, TranscoderProcess};

#[derive(Default)]
struct Script {
    launches: Vec<TranscoderParams>,
    /// (process index, first payload byte) per successful write
    writes: Vec<(usize, u8)>,
    write_attempts: usize,
    fail_writes: HashSet<usize>,
    /// write attempts after which the process exits without reporting an error
    exit_after_writes: HashSet<usize>,
    fail_launch: bool,
    shutdowns: usize,
}

struct FakeLauncher {
    available: bool,
    script: Arc<Mutex<Script>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeLauncher {
    fn new(script: Arc<Mutex<Script>>) -> Self {
        Self {
            available: true,
            script,
            gate: None,
        }
    }
}

#[async_trait]
impl TranscoderLauncher for FakeLauncher {
    fn is_available(&self) -> bool {
        self.available
    }

    async fn launch(&self, params: &TranscoderParams) -> Result<Box<dyn TranscoderProcess>> {
        let mut script = self.script.lock().unwrap();
        if script.fail_launch {
            return Err(launch_error("binary vanished"));
        }
        script.launches.push(params.clone());
        Ok(Box::new(FakeProcess {
            index: script.launches.len() - 1,
            alive: true,
            script: Arc::clone(&self.script),
            gate: self.gate.clone(),
        }))
    }
}

struct FakeProcess {
    index: usize,
    alive: bool,
    script: Arc<Mutex<Script>>,
    gate: Option<Arc<Semaphore>>,
}

#[async_trait]
impl TranscoderProcess for FakeProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.index as u32 + 1000)
    }

    fn is_alive(&mut self) -> bool {
        self.alive
    }

    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if let Some(gate) = &self.gate {
            gate.acquire().await.expect("gate open").forget();
        }
        let mut script = self.script.lock().unwrap();
        let attempt = script.write_attempts;
        script.write_attempts += 1;
        if script.fail_writes.contains(&attempt) {
            self.alive = false;
            return Err(relay_error("broken pipe"));
        }
        script.writes.push((self.index, data[0]));
        if script.exit_after_writes.contains(&attempt) {
            self.alive = false;
        }
        Ok(())
    }

    async fn shutdown(&mut self, _timeout: Duration) {
        self.alive = false;
        self.script.lock().unwrap().shutdowns += 1;
    }
}

fn config(queue_size: usize) -> RelayConfig {
    let dir = std::env::temp_dir().join(format!("porchwatch-relay-{}", uuid::Uuid::new_v4()));
    RelayConfig {
        enabled: true,
        playlist_path: dir.join("playlist.m3u8"),
        queue_size,
        stop_timeout_ms: 200,
        ..RelayConfig::default()
    }
}

fn frame(value: u8, width: u32, height: u32) -> Frame {
    Frame::now(width, height, vec![value; Frame::expected_len(width, height)]).expect("frame")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition met in time");
}

fn cleanup(relay: &LiveRelay) {
    if let Some(dir) = relay.playlist_path().parent() {
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn disabled_when_transcoder_missing() {
    let script = Arc::new(Mutex::new(Script::default()));
    let mut launcher = FakeLauncher::new(Arc::clone(&script));
    launcher.available = false;
    let relay = LiveRelay::new(config(4), Arc::new(launcher));

    assert!(!relay.enabled());
    assert_eq!(relay.state(), RelayState::Disabled);
    relay.start().await.expect("start is a no-op");
    relay.publish(frame(1, 2, 2), 20);
    assert_eq!(relay.queued(), 0);
    relay.stop().await;
    assert_eq!(relay.state(), RelayState::Disabled);
    assert!(script.lock().unwrap().launches.is_empty());
    assert!(!relay.playlist_ready());
}

#[tokio::test]
async fn disabled_when_turned_off_in_config() {
    let script = Arc::new(Mutex::new(Script::default()));
    let mut cfg = config(4);
    cfg.enabled = false;
    let relay = LiveRelay::new(cfg, Arc::new(FakeLauncher::new(script)));
    assert!(!relay.enabled());
}

#[tokio::test]
async fn relaunches_once_after_pipe_failure() {
    let script = Arc::new(Mutex::new(Script::default()));
    script.lock().unwrap().fail_writes.insert(2);
    let relay = LiveRelay::new(config(16), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    relay.start().await.expect("start");

    for value in 0..6u8 {
        relay.publish(frame(value, 2, 2), 20);
    }
    wait_until(|| script.lock().unwrap().writes.len() == 5).await;

    {
        let script = script.lock().unwrap();
        assert_eq!(script.launches.len(), 2);
        assert_eq!(script.launches[0], script.launches[1]);
        assert_eq!((script.launches[1].width, script.launches[1].fps), (2, 20));
        assert_eq!(
            script.writes,
            vec![(0, 0), (0, 1), (1, 3), (1, 4), (1, 5)]
        );
    }
    let stats = relay.stats();
    assert_eq!(stats.launches, 2);
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.frames_written, 5);
    assert_eq!(relay.state(), RelayState::Running);

    relay.stop().await;
    assert_eq!(script.lock().unwrap().shutdowns, 2);
    assert_eq!(relay.state(), RelayState::Stopped);
    cleanup(&relay);
}

#[tokio::test]
async fn relaunches_transcoder_that_exited_on_its_own() {
    let script = Arc::new(Mutex::new(Script::default()));
    script.lock().unwrap().exit_after_writes.insert(1);
    let relay = LiveRelay::new(config(16), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    relay.start().await.expect("start");

    for value in 0..4u8 {
        relay.publish(frame(value, 2, 2), 20);
    }
    wait_until(|| script.lock().unwrap().writes.len() == 4).await;

    {
        let script = script.lock().unwrap();
        assert_eq!(script.launches.len(), 2);
        assert_eq!(script.launches[0], script.launches[1]);
        assert_eq!(script.writes, vec![(0, 0), (0, 1), (1, 2), (1, 3)]);
        assert_eq!(script.shutdowns, 1);
    }
    let stats = relay.stats();
    assert_eq!(stats.restarts, 1);
    assert_eq!(stats.frames_written, 4);
    assert_eq!(relay.state(), RelayState::Running);

    relay.stop().await;
    assert_eq!(script.lock().unwrap().shutdowns, 2);
    cleanup(&relay);
}

#[tokio::test]
async fn start_purges_stale_playlist_but_relaunch_keeps_segments() {
    let script = Arc::new(Mutex::new(Script::default()));
    script.lock().unwrap().fail_writes.insert(1);
    let relay = LiveRelay::new(config(16), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    let dir = relay.playlist_path().parent().expect("segment dir").to_path_buf();
    std::fs::create_dir_all(&dir).expect("create dir");
    std::fs::write(relay.playlist_path(), "#EXTM3U").expect("stale playlist");
    std::fs::write(dir.join("segment_007.ts"), b"ts").expect("stale segment");
    std::fs::write(dir.join("notes.txt"), b"keep").expect("unrelated file");

    relay.start().await.expect("start");
    assert!(!relay.playlist_path().exists());
    assert!(!dir.join("segment_007.ts").exists());
    assert!(dir.join("notes.txt").exists());

    relay.publish(frame(0, 2, 2), 20);
    wait_until(|| script.lock().unwrap().writes.len() == 1).await;
    std::fs::write(dir.join("segment_000.ts"), b"ts").expect("live segment");

    relay.publish(frame(1, 2, 2), 20);
    relay.publish(frame(2, 2, 2), 20);
    wait_until(|| script.lock().unwrap().writes.len() == 2).await;
    assert_eq!(script.lock().unwrap().launches.len(), 2);
    assert!(dir.join("segment_000.ts").exists());

    relay.stop().await;
    cleanup(&relay);
}

#[tokio::test]
async fn launch_failure_halts_feeder_until_restart() {
    let script = Arc::new(Mutex::new(Script::default()));
    script.lock().unwrap().fail_launch = true;
    let relay = LiveRelay::new(config(4), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    relay.start().await.expect("start");

    relay.publish(frame(1, 2, 2), 20);
    let mut states = relay.subscribe_state();
    tokio::time::timeout(
        Duration::from_secs(5),
        states.wait_for(|state| *state == RelayState::Failed),
    )
    .await
    .expect("relay failed in time")
    .expect("state channel open");

    relay.publish(frame(2, 2, 2), 20);
    assert_eq!(relay.queued(), 0);

    script.lock().unwrap().fail_launch = false;
    relay.start().await.expect("restart");
    relay.publish(frame(3, 2, 2), 20);
    wait_until(|| script.lock().unwrap().writes == vec![(0, 3)]).await;
    relay.stop().await;
    cleanup(&relay);
}

#[tokio::test]
async fn slow_transcoder_never_grows_queue() {
    let script = Arc::new(Mutex::new(Script::default()));
    let gate = Arc::new(Semaphore::new(0));
    let mut launcher = FakeLauncher::new(Arc::clone(&script));
    launcher.gate = Some(Arc::clone(&gate));
    let relay = LiveRelay::new(config(4), Arc::new(launcher));
    relay.start().await.expect("start");

    relay.publish(frame(0, 2, 2), 20);
    // feeder takes the first frame and blocks inside the write
    wait_until(|| relay.queued() == 0 && !script.lock().unwrap().launches.is_empty()).await;

    for value in 1..=100u8 {
        relay.publish(frame(value, 2, 2), 20);
        assert!(relay.queued() <= 4);
    }
    assert_eq!(relay.queued(), 4);
    assert_eq!(relay.stats().frames_dropped, 96);

    gate.add_permits(1_000);
    wait_until(|| script.lock().unwrap().writes.last() == Some(&(0, 100))).await;
    let writes: Vec<u8> = script.lock().unwrap().writes.iter().map(|w| w.1).collect();
    assert_eq!(writes, vec![0, 97, 98, 99, 100]);

    relay.stop().await;
    cleanup(&relay);
}

#[tokio::test]
async fn resolution_change_relaunches_transcoder() {
    let script = Arc::new(Mutex::new(Script::default()));
    let relay = LiveRelay::new(config(8), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    relay.start().await.expect("start");

    relay.publish(frame(1, 2, 2), 20);
    relay.publish(frame(2, 4, 2), 20);
    wait_until(|| script.lock().unwrap().writes.len() == 2).await;

    let script_guard = script.lock().unwrap();
    let widths: Vec<u32> = script_guard.launches.iter().map(|p| p.width).collect();
    assert_eq!(widths, vec![2, 4]);
    assert_eq!(script_guard.shutdowns, 1);
    drop(script_guard);

    relay.stop().await;
    cleanup(&relay);
}

#[tokio::test]
async fn start_and_stop_are_idempotent() {
    let script = Arc::new(Mutex::new(Script::default()));
    let relay = LiveRelay::new(config(4), Arc::new(FakeLauncher::new(Arc::clone(&script))));
    relay.start().await.expect("start");
    relay.start().await.expect("second start");

    relay.publish(frame(9, 2, 2), 20);
    wait_until(|| script.lock().unwrap().writes.len() == 1).await;
    assert_eq!(script.lock().unwrap().launches.len(), 1);

    relay.stop().await;
    relay.stop().await;
    assert_eq!(relay.state(), RelayState::Stopped);
    assert_eq!(script.lock().unwrap().shutdowns, 1);

    relay.publish(frame(10, 2, 2), 20);
    assert_eq!(relay.queued(), 0);
    cleanup(&relay);
}

#[tokio::test]
async fn stop_aborts_a_wedged_feeder() {
    let script = Arc::new(Mutex::new(Script::default()));
    let mut launcher = FakeLauncher::new(Arc::clone(&script));
    launcher.gate = Some(Arc::new(Semaphore::new(0)));
    let mut cfg = config(4);
    cfg.stop_timeout_ms = 50;
    let relay = LiveRelay::new(cfg, Arc::new(launcher));
    relay.start().await.expect("start");

    relay.publish(frame(1, 2, 2), 20);
    wait_until(|| relay.queued() == 0 && !script.lock().unwrap().launches.is_empty()).await;

    tokio::time::timeout(Duration::from_secs(2), relay.stop())
        .await
        .expect("stop escalates instead of hanging");
    assert_eq!(relay.state(), RelayState::Stopped);
    assert_eq!(script.lock().unwrap().shutdowns, 0);
    cleanup(&relay);
}
