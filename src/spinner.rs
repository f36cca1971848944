//! Terminal progress spinner running as a background task.
//!
//! The only state shared with the foreground is the stop flag. `stop` raises it
//! and waits for the task to exit, so no frame can be written after it returns.

use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;

const FRAMES: [char; 4] = ['|', '/', '-', '\\'];
const TICK: Duration = Duration::from_millis(100);

pub struct Spinner {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Spinner {
    /// Starts a spinner on stdout.
    pub fn start(label: impl Into<String>) -> Self {
        Self::start_with(label, std::io::stdout())
    }

    /// Starts a spinner writing frames to `out`. Must be called inside a Tokio runtime.
    pub fn start_with<W>(label: impl Into<String>, mut out: W) -> Self
    where
        W: Write + Send + 'static,
    {
        let label = label.into();
        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);

        let handle = tokio::spawn(async move {
            for frame in FRAMES.iter().cycle() {
                if flag.load(Ordering::Acquire) {
                    break;
                }
                // Frames are cosmetic; a failed write is not worth surfacing.
                let _ = write!(out, "\r{label} {frame} (press Ctrl+C to stop)");
                let _ = out.flush();
                tokio::time::sleep(TICK).await;
            }
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Raises the stop flag and waits for the task to acknowledge it.
    pub async fn stop(mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            log::debug!("spinner task ended abnormally: {e}");
        }
    }
}

impl Drop for Spinner {
    fn drop(&mut self) {
        // A dropped spinner still winds down on its next tick.
        self.stop.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl SharedBuffer {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn writes_frames_until_stopped() {
        let buffer = SharedBuffer::default();
        let spinner = Spinner::start_with("Thinking...", buffer.clone());

        tokio::time::sleep(Duration::from_millis(250)).await;
        spinner.stop().await;

        let written = buffer.contents();
        assert!(written.contains("\rThinking... | (press Ctrl+C to stop)"));
        assert!(written.contains("\rThinking... / (press Ctrl+C to stop)"));
    }

    #[tokio::test]
    async fn no_frames_after_stop_returns() {
        let buffer = SharedBuffer::default();
        let spinner = Spinner::start_with("Working", buffer.clone());

        tokio::time::sleep(Duration::from_millis(50)).await;
        spinner.stop().await;
        let after_stop = buffer.contents();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(buffer.contents(), after_stop);
    }

    #[tokio::test]
    async fn stop_returns_within_one_tick() {
        let spinner = Spinner::start_with("Working", std::io::sink());

        let started = std::time::Instant::now();
        spinner.stop().await;

        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
