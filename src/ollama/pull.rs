//! Model download (`/api/pull`) with per-layer progress tracking.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use super::client::{OllamaClientTrait, OllamaError};
use crate::config::Config;

pub(crate) const PULL_PATH: &str = "/api/pull";

/// Characters of the layer digest used as its short identifier.
const SHORT_DIGEST_LEN: usize = 12;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// One decoded line of a `/api/pull` stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Download progress of the current layer.
#[derive(Debug, Clone, PartialEq)]
pub struct PullProgress {
    pub completed: u64,
    pub total: u64,
    pub percent: f64,
    /// Filled segments out of `width`.
    pub filled: usize,
    pub width: usize,
}

impl PullProgress {
    fn new(completed: u64, total: u64, width: usize) -> Self {
        let percent = completed as f64 / total as f64 * 100.0;
        let filled = ((width as u128 * completed as u128) / total as u128).min(width as u128) as usize;
        Self {
            completed,
            total,
            percent,
            filled,
            width,
        }
    }

    /// Fixed-width bar, e.g. `█████░░░░░`.
    pub fn bar(&self) -> String {
        let mut bar = "█".repeat(self.filled);
        bar.push_str(&"░".repeat(self.width - self.filled));
        bar
    }

    pub fn completed_mb(&self) -> u64 {
        self.completed / BYTES_PER_MB
    }

    pub fn total_mb(&self) -> u64 {
        self.total / BYTES_PER_MB
    }
}

impl fmt::Display for PullProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {:.1}% ({}/{} MB)",
            self.bar(),
            self.percent,
            self.completed_mb(),
            self.total_mb()
        )
    }
}

/// Something worth showing while a pull runs.
#[derive(Debug, Clone, PartialEq)]
pub enum PullUpdate {
    /// Human-readable stage such as "verifying sha256 digest".
    Milestone(String),
    /// A new layer started downloading; carries its short digest.
    LayerStarted(String),
    Progress(PullProgress),
}

/// Folds pull events into user-facing updates.
#[derive(Debug, Clone)]
pub struct PullTracker {
    width: usize,
    current_layer: Option<String>,
    last_milestone: Option<String>,
}

impl PullTracker {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            current_layer: None,
            last_milestone: None,
        }
    }

    /// Returns the updates `event` produces, or the server's message if it is an error event.
    pub fn observe(&mut self, event: &PullEvent) -> Result<Vec<PullUpdate>, String> {
        if let Some(error) = &event.error {
            return Err(error.clone());
        }

        let mut updates = Vec::new();
        let Some(digest) = event.digest.as_deref() else {
            if let Some(status) = event.status.as_deref().filter(|s| is_milestone(s))
                && self.last_milestone.as_deref() != Some(status)
            {
                self.last_milestone = Some(status.to_string());
                updates.push(PullUpdate::Milestone(status.to_string()));
            }
            return Ok(updates);
        };

        let short: String = digest.chars().take(SHORT_DIGEST_LEN).collect();
        if self.current_layer.as_deref() != Some(short.as_str()) {
            self.current_layer = Some(short.clone());
            updates.push(PullUpdate::LayerStarted(short));
        }

        if let (Some(total), Some(completed)) = (event.total, event.completed)
            && total > 0
        {
            updates.push(PullUpdate::Progress(PullProgress::new(completed, total, self.width)));
        }

        Ok(updates)
    }
}

/// `"success"` is reported as the outcome and `"pulling …"` lines only
/// announce what the digest events already show.
fn is_milestone(status: &str) -> bool {
    !status.is_empty() && status != "success" && !status.starts_with("pulling ")
}

/// How a pull ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullOutcome {
    Success { model: String },
    Cancelled,
}

/// Downloads a model into the local server's catalog.
pub struct ModelPuller {
    client: Arc<dyn OllamaClientTrait>,
    idle_timeout: Option<Duration>,
    bar_width: usize,
}

impl ModelPuller {
    /// Creates a puller that talks to the model server through `client`.
    ///
    /// # Arguments
    ///
    /// * `client` - The model server client (or a test double)
    /// * `config` - Supplies the idle timeout (none by default) and the progress bar width
    pub fn new(client: Arc<dyn OllamaClientTrait>, config: &Config) -> Self {
        Self {
            client,
            idle_timeout: config.pull_idle_timeout,
            bar_width: config.progress_bar_width,
        }
    }

    /// Pulls `model`, reporting milestones, layer changes and progress through `on_update`.
    ///
    /// An `error` event stops processing at once and is returned as
    /// [`OllamaError::Api`] with the server's message; later lines are not read.
    pub async fn pull<F>(
        &self,
        model: &str,
        cancel: &CancellationToken,
        mut on_update: F,
    ) -> Result<PullOutcome, OllamaError>
    where
        F: FnMut(&PullUpdate),
    {
        let model = model.trim();
        if model.is_empty() {
            return Err(OllamaError::EmptyModelName);
        }

        let body = serde_json::json!({ "name": model, "stream": true });
        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PullOutcome::Cancelled),
            opened = self.client.stream_json(PULL_PATH, body, self.idle_timeout) => opened,
        };
        let mut events = opened?;

        let mut tracker = PullTracker::new(self.bar_width);
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(PullOutcome::Cancelled),
                next = events.next() => next,
            };
            let Some(value) = next.transpose()? else {
                break;
            };
            if let Some(error) = OllamaError::from_event(&value) {
                return Err(error);
            }
            let Ok(event) = serde_json::from_value::<PullEvent>(value) else {
                continue;
            };

            let updates = tracker
                .observe(&event)
                .map_err(|message| OllamaError::Api { message })?;
            for update in &updates {
                on_update(update);
            }
        }

        log::debug!("pull of {model} finished");
        Ok(PullOutcome::Success {
            model: model.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(json: &str) -> PullEvent {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn status_without_digest_is_a_milestone_once_per_change() {
        let mut tracker = PullTracker::new(30);

        let first = tracker.observe(&event(r#"{"status":"verifying sha256 digest"}"#)).unwrap();
        let repeat = tracker.observe(&event(r#"{"status":"verifying sha256 digest"}"#)).unwrap();
        let next = tracker.observe(&event(r#"{"status":"writing manifest"}"#)).unwrap();

        assert_eq!(first, vec![PullUpdate::Milestone("verifying sha256 digest".into())]);
        assert!(repeat.is_empty());
        assert_eq!(next, vec![PullUpdate::Milestone("writing manifest".into())]);
    }

    #[test]
    fn success_and_pulling_statuses_are_not_milestones() {
        let mut tracker = PullTracker::new(30);
        assert!(tracker.observe(&event(r#"{"status":"pulling manifest"}"#)).unwrap().is_empty());
        assert!(tracker.observe(&event(r#"{"status":"success"}"#)).unwrap().is_empty());
    }

    #[test]
    fn digest_change_starts_a_new_layer_with_short_id() {
        let mut tracker = PullTracker::new(30);

        let updates = tracker
            .observe(&event(r#"{"status":"pulling abc","digest":"sha256:0123456789abcdef"}"#))
            .unwrap();

        assert_eq!(updates, vec![PullUpdate::LayerStarted("sha256:01234".into())]);
        let same_layer = tracker
            .observe(&event(r#"{"status":"pulling abc","digest":"sha256:0123456789abcdef"}"#))
            .unwrap();
        assert!(same_layer.is_empty());
    }

    #[test]
    fn progress_needs_total_and_completed() {
        let mut tracker = PullTracker::new(30);

        let only_total = tracker.observe(&event(r#"{"digest":"d1","total":100}"#)).unwrap();
        let zero_total = tracker
            .observe(&event(r#"{"digest":"d1","total":0,"completed":0}"#))
            .unwrap();

        assert_eq!(only_total, vec![PullUpdate::LayerStarted("d1".into())]);
        assert!(zero_total.is_empty());
    }

    #[test]
    fn progress_bar_has_fixed_resolution() {
        let progress = PullProgress::new(50, 100, 30);
        assert_eq!(progress.percent, 50.0);
        assert_eq!(progress.filled, 15);
        assert_eq!(progress.bar().chars().count(), 30);
        assert_eq!(progress.bar(), format!("{}{}", "█".repeat(15), "░".repeat(15)));
    }

    #[test]
    fn progress_bar_is_clamped_when_completed_exceeds_total() {
        let progress = PullProgress::new(150, 100, 30);
        assert_eq!(progress.filled, 30);
        assert_eq!(progress.bar(), "█".repeat(30));
    }

    #[test]
    fn progress_display_shows_megabytes() {
        let progress = PullProgress::new(512 * 1024 * 1024, 1024 * 1024 * 1024, 10);
        assert_eq!(progress.to_string(), "█████░░░░░ 50.0% (512/1024 MB)");
    }

    #[test]
    fn error_event_overrides_other_fields() {
        let mut tracker = PullTracker::new(30);
        let result = tracker.observe(&event(
            r#"{"status":"verifying","digest":"d1","total":10,"completed":5,"error":"model not found"}"#,
        ));
        assert_eq!(result, Err("model not found".to_string()));
        let next = tracker.observe(&event(r#"{"digest":"d1"}"#)).unwrap();
        assert_eq!(next, vec![PullUpdate::LayerStarted("d1".into())]);
    }
}
