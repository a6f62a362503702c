//! Log tail sessions over a remote exec stream.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace, warn};

use super::debounce::Debouncer;
use super::frame::{decode_frame, Frame};
use crate::cluster::{wait_cancelled, ClusterApi, ExecStream, ExecTarget};
use crate::error::Result;

/// Text shown to the consumer. `revision` grows by one per flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogSnapshot {
    pub text: String,
    pub revision: u64,
}

/// Accumulated output, bounded to the last `max_lines` lines.
#[derive(Debug, Clone)]
pub struct LogBuffer {
    text: String,
    max_lines: usize,
}

impl LogBuffer {
    pub fn new(max_lines: usize) -> Self {
        Self {
            text: String::new(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
        self.trim();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    fn line_count(&self) -> usize {
        let newlines = self.text.matches('\n').count();
        if self.text.is_empty() || self.text.ends_with('\n') {
            newlines
        } else {
            newlines + 1
        }
    }

    fn trim(&mut self) {
        let excess = self.line_count().saturating_sub(self.max_lines);
        if excess == 0 {
            return;
        }
        if let Some((idx, _)) = self.text.match_indices('\n').nth(excess - 1) {
            self.text.drain(..=idx);
        }
    }
}

/// One open log tail. Sessions are never shared between targets.
pub struct LogTailSession {
    target: ExecTarget,
    snapshot: watch::Receiver<LogSnapshot>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl LogTailSession {
    /// Start `command` in `target` and begin accumulating its stdout.
    pub async fn open(
        cluster: Arc<dyn ClusterApi>,
        target: ExecTarget,
        command: Vec<String>,
        max_lines: usize,
    ) -> Result<Self> {
        let stream = cluster.exec(&target, &command).await?;
        info!(target = %target, max_lines, "Log tail opened");

        let (snapshot_tx, snapshot_rx) = watch::channel(LogSnapshot::default());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(pump(
            target.clone(),
            stream,
            LogBuffer::new(max_lines),
            Debouncer::default(),
            snapshot_tx,
            shutdown_rx,
        ));

        Ok(Self {
            target,
            snapshot: snapshot_rx,
            shutdown: shutdown_tx,
            handle: Some(handle),
        })
    }

    pub fn target(&self) -> &ExecTarget {
        &self.target
    }

    pub fn subscribe(&self) -> watch::Receiver<LogSnapshot> {
        self.snapshot.clone()
    }

    /// Latest flushed snapshot.
    pub fn snapshot(&self) -> LogSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Wait for the remote command to finish on its own.
    pub async fn finished(&mut self) {
        if let Some(handle) = self.handle.as_mut() {
            let _ = handle.await;
            self.handle = None;
        }
    }

    /// Cancel the remote command and any pending flush, then wait for the
    /// session task to exit.
    pub async fn close(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        debug!(target = %self.target, "Log tail closed");
    }
}

impl Drop for LogTailSession {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

async fn pump(
    target: ExecTarget,
    mut stream: ExecStream,
    mut buffer: LogBuffer,
    mut debouncer: Debouncer,
    snapshot: watch::Sender<LogSnapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let publish = |buffer: &LogBuffer| {
        snapshot.send_modify(|s| {
            s.text = buffer.as_str().to_string();
            s.revision += 1;
        });
    };

    loop {
        let deadline = debouncer.deadline();

        tokio::select! {
            frame = stream.next_frame() => match frame {
                Some(Ok(raw)) => match decode_frame(&raw) {
                    Frame::Stdout(text) => {
                        buffer.push(&text);
                        if debouncer.schedule(Instant::now()) {
                            publish(&buffer);
                        }
                    }
                    Frame::Discarded { channel } => {
                        trace!(target = %target, ?channel, len = raw.len(), "Discarded frame");
                    }
                },
                Some(Err(e)) => {
                    warn!(target = %target, error = %e, "Log stream failed");
                    if debouncer.flush_pending() {
                        publish(&buffer);
                    }
                    break;
                }
                None => {
                    if debouncer.flush_pending() {
                        publish(&buffer);
                    }
                    debug!(target = %target, "Log stream ended");
                    break;
                }
            },
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                if debouncer.fire(Instant::now()) {
                    publish(&buffer);
                }
            }
            _ = wait_cancelled(&mut shutdown) => {
                debouncer.cancel();
                stream.cancel();
                break;
            }
        }
    }
}

// =============================================================================
// Follower
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
struct FollowKey {
    target: ExecTarget,
    command: Vec<String>,
    max_lines: usize,
}

/// Keeps at most one session open and retargets it on demand.
pub struct LogFollower {
    cluster: Arc<dyn ClusterApi>,
    current: Option<(FollowKey, LogTailSession)>,
}

impl LogFollower {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            current: None,
        }
    }

    /// Follow `command` in `target`. Changing any parameter closes the
    /// previous session completely before the next one opens; unchanged
    /// parameters keep the running session.
    pub async fn follow(
        &mut self,
        target: ExecTarget,
        command: Vec<String>,
        max_lines: usize,
    ) -> Result<watch::Receiver<LogSnapshot>> {
        let key = FollowKey {
            target,
            command,
            max_lines,
        };

        if let Some((current, session)) = &self.current {
            if *current == key {
                return Ok(session.subscribe());
            }
        }

        self.stop().await;
        let session = LogTailSession::open(
            Arc::clone(&self.cluster),
            key.target.clone(),
            key.command.clone(),
            key.max_lines,
        )
        .await?;
        let rx = session.subscribe();
        self.current = Some((key, session));
        Ok(rx)
    }

    pub fn session(&self) -> Option<&LogTailSession> {
        self.current.as_ref().map(|(_, s)| s)
    }

    /// Close the current session, if any.
    pub async fn stop(&mut self) {
        if let Some((_, session)) = self.current.take() {
            session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::cluster::{ExecScript, FailPoint, FakeCluster};

    fn target() -> ExecTarget {
        ExecTarget::new("gadget", "gadget-abc", "gadget")
    }

    fn command(lines: usize) -> Vec<String> {
        vec!["tail".to_string(), format!("-n{lines}")]
    }

    #[test]
    fn test_buffer_keeps_last_lines() {
        let mut buffer = LogBuffer::new(2);
        buffer.push("a\nb\n");
        buffer.push("c\nd");
        assert_eq!(buffer.as_str(), "c\nd");

        buffer.push("\ne\n");
        assert_eq!(buffer.as_str(), "d\ne\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_drops_non_stdout_frames() {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .script_exec(
                ExecScript::new()
                    .frame(Duration::from_millis(10), 1, "foo")
                    .frame(Duration::from_millis(10), 0, "bar")
                    .frame(Duration::from_millis(10), 1, "baz"),
            )
            .await;

        let mut session = LogTailSession::open(cluster.clone(), target(), command(100), 100)
            .await
            .unwrap();
        session.finished().await;

        assert_eq!(session.snapshot().text, "foobaz");
    }

    #[tokio::test(start_paused = true)]
    async fn test_continuous_stream_is_rate_limited() {
        let cluster = Arc::new(FakeCluster::new());
        let mut script = ExecScript::new();
        for i in 0..30 {
            script = script.frame(Duration::from_millis(100), 1, &format!("line {i}\n"));
        }
        cluster.script_exec(script).await;

        let mut session = LogTailSession::open(cluster.clone(), target(), command(100), 100)
            .await
            .unwrap();
        session.finished().await;

        let snapshot = session.snapshot();
        assert!(snapshot.revision <= 6, "revision {}", snapshot.revision);
        assert!(snapshot.text.starts_with("line 0\n"));
        assert!(snapshot.text.ends_with("line 29\n"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_cancels_remote_command() {
        let cluster = Arc::new(FakeCluster::new());
        cluster
            .script_exec(
                ExecScript::new()
                    .frame(Duration::from_millis(10), 1, "foo")
                    .frame(Duration::from_millis(10), 1, "bar")
                    .hold_open(),
            )
            .await;

        let session = LogTailSession::open(cluster.clone(), target(), command(100), 100)
            .await
            .unwrap();
        let mut rx = session.subscribe();
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().text, "foo");

        session.close().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cluster.exec_cancellations(), 1);

        // No trailing flush after close.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(rx.borrow().text, "foo");
    }

    #[tokio::test(start_paused = true)]
    async fn test_follower_retargets() {
        let cluster = Arc::new(FakeCluster::new());
        for _ in 0..2 {
            cluster
                .script_exec(
                    ExecScript::new()
                        .frame(Duration::from_millis(10), 1, "x")
                        .hold_open(),
                )
                .await;
        }

        let mut follower = LogFollower::new(cluster.clone());
        follower.follow(target(), command(100), 100).await.unwrap();
        follower.follow(target(), command(100), 100).await.unwrap();
        assert_eq!(cluster.exec_calls().await.len(), 1);

        follower.follow(target(), command(500), 500).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cluster.exec_calls().await.len(), 2);
        assert_eq!(cluster.exec_cancellations(), 1);

        follower.stop().await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(cluster.exec_cancellations(), 2);
    }

    #[tokio::test]
    async fn test_open_failure_is_reported() {
        let cluster = Arc::new(FakeCluster::new());
        cluster.fail(FailPoint::Exec).await;
        let result = LogTailSession::open(cluster, target(), command(100), 100).await;
        assert!(result.is_err());
    }
}
