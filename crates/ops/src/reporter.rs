//! Progress line per step: label + spinner while the step runs, resolved to a
//! mark once the caller signals completion.

use std::io::{IsTerminal, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use kflex_core::StepStatus;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const FRAMES: [&str; 10] = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
const DONE_MARK: &str = "✔";
const FAILED_MARK: &str = "✘";

type Sink = Arc<Mutex<Box<dyn Write + Send>>>;

/// One recorded status transition of an announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub label: String,
    pub status: StepStatus,
}

/// Writes progress lines to the operator. Never fails: write errors on the
/// sink are dropped.
#[derive(Clone)]
pub struct StatusReporter {
    sink: Sink,
    animate: bool,
    tick: Duration,
    transcript: Arc<Mutex<Vec<ProgressEvent>>>,
}

impl StatusReporter {
    /// Reporter on stdout. Animates only on a terminal and when
    /// `KFLEX_NO_SPINNER` is unset.
    pub fn stdout() -> Self {
        let animate = std::io::stdout().is_terminal() && std::env::var_os("KFLEX_NO_SPINNER").is_none();
        let tick_ms = std::env::var("KFLEX_SPINNER_MS").ok().and_then(|s| s.parse::<u64>().ok()).unwrap_or(100);
        Self::new(std::io::stdout()).animated(animate).with_tick(Duration::from_millis(tick_ms.max(10)))
    }

    /// Reporter on an arbitrary sink, without animation.
    pub fn new(sink: impl Write + Send + 'static) -> Self {
        Self {
            sink: Arc::new(Mutex::new(Box::new(sink))),
            animate: false,
            tick: Duration::from_millis(100),
            transcript: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn animated(mut self, on: bool) -> Self { self.animate = on; self }

    pub fn with_tick(mut self, tick: Duration) -> Self { self.tick = tick; self }

    /// Every transition recorded so far, in order.
    pub fn transcript(&self) -> Vec<ProgressEvent> {
        self.transcript.lock().map(|t| t.clone()).unwrap_or_default()
    }

    /// Start showing `label` on a background task and return at once. Must be
    /// called from within a tokio runtime.
    pub fn announce(&self, label: impl Into<String>) -> Announcement {
        let label = label.into();
        let mut status = StepStatus::Pending;
        status.advance(StepStatus::Running);
        record(&self.transcript, &label, status);

        let (tx, rx) = oneshot::channel::<StepStatus>();
        let task = tokio::spawn(display(self.sink.clone(), self.transcript.clone(), label.clone(), self.animate, self.tick, rx));
        Announcement { label, status, tx: Some(tx), task: Some(task) }
    }
}

fn record(transcript: &Mutex<Vec<ProgressEvent>>, label: &str, status: StepStatus) {
    if let Ok(mut t) = transcript.lock() {
        t.push(ProgressEvent { label: label.to_string(), status });
    }
}

fn emit(sink: &Sink, text: &str) {
    if let Ok(mut w) = sink.lock() {
        let _ = w.write_all(text.as_bytes());
        let _ = w.flush();
    }
}

async fn display(
    sink: Sink,
    transcript: Arc<Mutex<Vec<ProgressEvent>>>,
    label: String,
    animate: bool,
    tick: Duration,
    mut rx: oneshot::Receiver<StepStatus>,
) {
    // A dropped sender counts as a failure.
    let outcome = if animate {
        let mut ticker = tokio::time::interval(tick);
        let mut frame = 0usize;
        loop {
            tokio::select! {
                res = &mut rx => break res.unwrap_or(StepStatus::Failed),
                _ = ticker.tick() => {
                    emit(&sink, &format!("\r{} {}", label, FRAMES[frame % FRAMES.len()]));
                    frame += 1;
                }
            }
        }
    } else {
        emit(&sink, &format!("{} ", label));
        rx.await.unwrap_or(StepStatus::Failed)
    };

    let mark = if outcome == StepStatus::Done { DONE_MARK } else { FAILED_MARK };
    if animate {
        emit(&sink, &format!("\r{} {}\n", label, mark));
    } else {
        emit(&sink, &format!("{}\n", mark));
    }
    record(&transcript, &label, outcome);
}

/// Handle of a live progress line. Resolve it with [`complete`](Self::complete)
/// or [`fail`](Self::fail); dropping it unresolved marks it failed so the
/// display task always ends.
pub struct Announcement {
    label: String,
    status: StepStatus,
    tx: Option<oneshot::Sender<StepStatus>>,
    task: Option<JoinHandle<()>>,
}

impl Announcement {
    pub fn label(&self) -> &str { &self.label }

    pub fn status(&self) -> StepStatus { self.status }

    /// Replace the spinner with the done mark and wait for the line to be written.
    pub async fn complete(self) { self.resolve(StepStatus::Done).await }

    pub async fn fail(self) { self.resolve(StepStatus::Failed).await }

    async fn resolve(mut self, status: StepStatus) {
        self.status.advance(status);
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(status);
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for Announcement {
    fn drop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(StepStatus::Failed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Buf(Arc<Mutex<Vec<u8>>>);

    impl Write for Buf {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().expect("buf").extend_from_slice(data);
            Ok(data.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    impl Buf {
        fn text(&self) -> String { String::from_utf8_lossy(&self.0.lock().expect("buf")).into_owned() }
    }

    #[tokio::test]
    async fn complete_writes_label_then_mark() {
        let buf = Buf::default();
        let reporter = StatusReporter::new(buf.clone());
        let a = reporter.announce("Installing kind...");
        assert_eq!(a.status(), StepStatus::Running);
        a.complete().await;
        assert_eq!(buf.text(), "Installing kind... ✔\n");
        assert_eq!(
            reporter.transcript(),
            vec![
                ProgressEvent { label: "Installing kind...".into(), status: StepStatus::Running },
                ProgressEvent { label: "Installing kind...".into(), status: StepStatus::Done },
            ]
        );
    }

    #[tokio::test]
    async fn fail_writes_failure_mark() {
        let buf = Buf::default();
        let reporter = StatusReporter::new(buf.clone());
        reporter.announce("Creating kind cluster...").fail().await;
        assert_eq!(buf.text(), "Creating kind cluster... ✘\n");
        assert_eq!(reporter.transcript().last().map(|e| e.status), Some(StepStatus::Failed));
    }

    #[tokio::test]
    async fn dropped_announcement_still_ends_the_task() {
        let buf = Buf::default();
        let reporter = StatusReporter::new(buf.clone());
        let a = reporter.announce("Patching nginx ingress...");
        drop(a);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while reporter.transcript().len() < 2 {
            assert!(tokio::time::Instant::now() < deadline, "display task did not finish");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(reporter.transcript()[1].status, StepStatus::Failed);
        assert!(buf.text().ends_with("✘\n"));
    }

    #[tokio::test]
    async fn animated_line_spins_until_completed() {
        let buf = Buf::default();
        let reporter = StatusReporter::new(buf.clone()).animated(true).with_tick(Duration::from_millis(5));
        let a = reporter.announce("Installing nginx ingress...");
        tokio::time::sleep(Duration::from_millis(40)).await;
        a.complete().await;
        let text = buf.text();
        assert!(text.contains(&format!("\rInstalling nginx ingress... {}", FRAMES[0])));
        assert!(text.ends_with("\rInstalling nginx ingress... ✔\n"));
        assert_eq!(text.matches('\n').count(), 1);
    }

    #[tokio::test]
    async fn sequential_announcements_do_not_interleave() {
        let buf = Buf::default();
        let reporter = StatusReporter::new(buf.clone());
        reporter.announce("one").complete().await;
        reporter.announce("two").complete().await;
        assert_eq!(buf.text(), "one ✔\ntwo ✔\n");
        let statuses: Vec<_> = reporter.transcript().into_iter().map(|e| (e.label, e.status)).collect();
        assert_eq!(
            statuses,
            vec![
                ("one".to_string(), StepStatus::Running),
                ("one".to_string(), StepStatus::Done),
                ("two".to_string(), StepStatus::Running),
                ("two".to_string(), StepStatus::Done),
            ]
        );
    }
}
