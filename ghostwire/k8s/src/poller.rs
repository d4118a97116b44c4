//! Role label polling.
//!
//! On a fixed cadence the poller reads one label on the owning pod,
//! classifies the value against the configured `active`/`preview` strings,
//! and invokes the transition handler when both endpoints of a change are
//! recognized. Read errors and handler errors never stop the loop.

use anyhow::{bail, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::{sync::Arc, time::Duration};
use tokio::time;
use tracing::{debug, info, warn};

use crate::labels::LabelReader;

/// Invoked when the pod's role label moves between recognized values. On
/// the first recognized observation `previous` is empty.
#[async_trait]
pub trait TransitionHandler: Send + Sync {
    async fn on_transition(&self, previous: &str, current: &str) -> Result<()>;
}

/// Settings for [`RolePoller::new`].
pub struct PollerConfig {
    pub reader: Arc<dyn LabelReader>,
    pub label_key: String,
    pub active_value: String,
    pub preview_value: String,
    pub poll_interval: Duration,
    pub handler: Option<Arc<dyn TransitionHandler>>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum RoleState {
    Unknown,
    Observed(String),
}

/// Periodically reads the role label and emits transitions between the
/// recognized active and preview values.
pub struct RolePoller {
    reader: Arc<dyn LabelReader>,
    label_key: String,
    active_value: String,
    preview_value: String,
    poll_interval: Duration,
    handler: Option<Arc<dyn TransitionHandler>>,
    state: Mutex<RoleState>,
}

impl RolePoller {
    pub fn new(config: PollerConfig) -> Result<Self> {
        if config.label_key.is_empty() {
            bail!("role label key must not be empty");
        }
        if config.active_value.is_empty() {
            bail!("active role value must not be empty");
        }
        if config.preview_value.is_empty() {
            bail!("preview role value must not be empty");
        }
        if config.active_value == config.preview_value {
            bail!("active and preview role values must differ");
        }
        if config.poll_interval.is_zero() {
            bail!("poll interval must be positive");
        }

        Ok(Self {
            reader: config.reader,
            label_key: config.label_key,
            active_value: config.active_value,
            preview_value: config.preview_value,
            poll_interval: config.poll_interval,
            handler: config.handler,
            state: Mutex::new(RoleState::Unknown),
        })
    }

    /// The last observed label value; empty before the first successful
    /// poll.
    pub fn current_role(&self) -> String {
        match &*self.state.lock() {
            RoleState::Unknown => String::new(),
            RoleState::Observed(value) => value.clone(),
        }
    }

    /// Runs the poll loop until the shutdown watch signals. The first poll
    /// fires immediately to capture the starting state.
    pub async fn run(self: Arc<Self>, shutdown: drain::Watch) {
        info!(
            label_key = %self.label_key,
            poll_interval = ?self.poll_interval,
            "starting role poller"
        );

        let mut ticks = time::interval(self.poll_interval);
        ticks.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        let poller = self.clone();
        let poll = async move {
            loop {
                ticks.tick().await;
                poller.poll_once().await;
            }
        };

        tokio::select! {
            _ = poll => unreachable!("poll loop never returns"),
            _ = shutdown.signaled() => {}
        }

        info!(label_key = %self.label_key, "stopping role poller");
    }

    /// Performs a single poll: read the label, classify, and invoke the
    /// handler on a recognized transition.
    pub async fn poll_once(&self) {
        let value = match self.reader.get_label(&self.label_key).await {
            Ok(value) => value,
            Err(error) => {
                warn!(label_key = %self.label_key, %error, "failed to read pod label");
                return;
            }
        };

        // Classify under the lock; the handler performs kernel I/O and
        // runs after the guard is dropped.
        let transition = {
            let mut state = self.state.lock();
            match &*state {
                RoleState::Unknown => {
                    let recognized = self.is_recognized(&value);
                    debug!(current_role = %value, recognized, "initialized role state");
                    *state = RoleState::Observed(value.clone());
                    recognized.then(|| (String::new(), value))
                }
                RoleState::Observed(previous) if *previous == value => {
                    debug!(current_role = %value, "role state unchanged");
                    None
                }
                RoleState::Observed(previous) => {
                    let previous = previous.clone();
                    *state = RoleState::Observed(value.clone());
                    if self.is_recognized(&previous) && self.is_recognized(&value) {
                        info!(
                            previous_role = %previous,
                            current_role = %value,
                            "role transition detected"
                        );
                        Some((previous, value))
                    } else {
                        debug!(
                            previous_role = %previous,
                            current_role = %value,
                            "role changed without recognized transition"
                        );
                        None
                    }
                }
            }
        };

        let Some((previous, current)) = transition else {
            return;
        };
        let Some(handler) = &self.handler else {
            return;
        };
        if let Err(error) = handler.on_transition(&previous, &current).await {
            warn!(
                previous_role = %previous,
                current_role = %current,
                %error,
                "transition handler failed"
            );
        }
    }

    fn is_recognized(&self, value: &str) -> bool {
        value == self.active_value || value == self.preview_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    struct ScriptedLabels {
        responses: Mutex<VecDeque<Result<String>>>,
        reads: AtomicUsize,
    }

    impl ScriptedLabels {
        fn new(responses: Vec<Result<String>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                reads: AtomicUsize::new(0),
            })
        }

        fn reads(&self) -> usize {
            self.reads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LabelReader for ScriptedLabels {
        async fn get_label(&self, _key: &str) -> Result<String> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok("active".to_string()))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        transitions: Mutex<Vec<(String, String)>>,
        fail: AtomicBool,
    }

    impl RecordingHandler {
        fn transitions(&self) -> Vec<(String, String)> {
            self.transitions.lock().clone()
        }
    }

    #[async_trait]
    impl TransitionHandler for RecordingHandler {
        async fn on_transition(&self, previous: &str, current: &str) -> Result<()> {
            self.transitions
                .lock()
                .push((previous.to_string(), current.to_string()));
            if self.fail.load(Ordering::SeqCst) {
                bail!("handler failure");
            }
            Ok(())
        }
    }

    fn poller(
        reader: Arc<dyn LabelReader>,
        handler: Option<Arc<dyn TransitionHandler>>,
    ) -> RolePoller {
        RolePoller::new(PollerConfig {
            reader,
            label_key: "role".to_string(),
            active_value: "active".to_string(),
            preview_value: "preview".to_string(),
            poll_interval: Duration::from_secs(2),
            handler,
        })
        .unwrap()
    }

    fn ok(value: &str) -> Result<String> {
        Ok(value.to_string())
    }

    #[test]
    fn construction_validates_inputs() {
        let reader = ScriptedLabels::new(Vec::new());
        let base = |label_key: &str, active: &str, preview: &str, interval| PollerConfig {
            reader: reader.clone() as Arc<dyn LabelReader>,
            label_key: label_key.to_string(),
            active_value: active.to_string(),
            preview_value: preview.to_string(),
            poll_interval: interval,
            handler: None,
        };

        assert!(RolePoller::new(base("", "active", "preview", Duration::from_secs(1))).is_err());
        assert!(RolePoller::new(base("role", "", "preview", Duration::from_secs(1))).is_err());
        assert!(RolePoller::new(base("role", "active", "", Duration::from_secs(1))).is_err());
        assert!(RolePoller::new(base("role", "same", "same", Duration::from_secs(1))).is_err());
        assert!(RolePoller::new(base("role", "active", "preview", Duration::ZERO)).is_err());
        assert!(RolePoller::new(base("role", "active", "preview", Duration::from_secs(1))).is_ok());
    }

    #[tokio::test]
    async fn first_recognized_observation_invokes_handler_with_empty_previous() {
        let reader = ScriptedLabels::new(vec![ok("preview")]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        poller.poll_once().await;

        assert_eq!(
            handler.transitions(),
            vec![(String::new(), "preview".to_string())]
        );
        assert_eq!(poller.current_role(), "preview");
    }

    #[tokio::test]
    async fn first_unrecognized_observation_is_recorded_without_handler() {
        let reader = ScriptedLabels::new(vec![ok("canary")]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        poller.poll_once().await;

        assert!(handler.transitions().is_empty());
        assert_eq!(poller.current_role(), "canary");
    }

    #[tokio::test]
    async fn unchanged_value_does_not_reinvoke_handler() {
        let reader = ScriptedLabels::new(vec![ok("active"), ok("active"), ok("active")]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        for _ in 0..3 {
            poller.poll_once().await;
        }

        assert_eq!(
            handler.transitions(),
            vec![(String::new(), "active".to_string())]
        );
    }

    #[tokio::test]
    async fn recognized_transitions_fire_in_both_directions() {
        let reader = ScriptedLabels::new(vec![ok("active"), ok("preview"), ok("active")]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        for _ in 0..3 {
            poller.poll_once().await;
        }

        assert_eq!(
            handler.transitions(),
            vec![
                (String::new(), "active".to_string()),
                ("active".to_string(), "preview".to_string()),
                ("preview".to_string(), "active".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn partially_recognized_changes_are_diagnostic_only() {
        let reader = ScriptedLabels::new(vec![ok("active"), ok("canary"), ok("preview")]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        for _ in 0..3 {
            poller.poll_once().await;
        }

        // active -> canary and canary -> preview each have an unrecognized
        // endpoint; only the initial observation reaches the handler.
        assert_eq!(
            handler.transitions(),
            vec![(String::new(), "active".to_string())]
        );
        assert_eq!(poller.current_role(), "preview");
    }

    #[tokio::test]
    async fn read_error_preserves_state_and_polling_continues() {
        let reader = ScriptedLabels::new(vec![
            ok("active"),
            bail_response(),
            ok("preview"),
        ]);
        let handler = Arc::new(RecordingHandler::default());
        let poller = poller(reader, Some(handler.clone()));

        for _ in 0..3 {
            poller.poll_once().await;
        }

        assert_eq!(
            handler.transitions(),
            vec![
                (String::new(), "active".to_string()),
                ("active".to_string(), "preview".to_string()),
            ]
        );
    }

    fn bail_response() -> Result<String> {
        Err(anyhow::anyhow!("api unavailable"))
    }

    #[tokio::test]
    async fn handler_errors_do_not_stop_polling() {
        let reader = ScriptedLabels::new(vec![ok("active"), ok("preview"), ok("active")]);
        let handler = Arc::new(RecordingHandler {
            fail: AtomicBool::new(true),
            ..Default::default()
        });
        let poller = poller(reader, Some(handler.clone()));

        for _ in 0..3 {
            poller.poll_once().await;
        }

        assert_eq!(handler.transitions().len(), 3);
        assert_eq!(poller.current_role(), "active");
    }

    #[tokio::test]
    async fn current_role_is_empty_before_first_poll() {
        let reader = ScriptedLabels::new(vec![ok("active")]);
        let poller = poller(reader, None);
        assert_eq!(poller.current_role(), "");
        poller.poll_once().await;
        assert_eq!(poller.current_role(), "active");
    }

    #[tokio::test(start_paused = true)]
    async fn run_polls_on_interval_until_shutdown() {
        let reader = ScriptedLabels::new(Vec::new());
        let poller = Arc::new(poller(reader.clone(), None));
        let (signal, watch) = drain::channel();

        let task = tokio::spawn(poller.run(watch));

        // Initial poll plus two interval ticks.
        time::sleep(Duration::from_millis(10)).await;
        time::sleep(Duration::from_secs(4)).await;
        signal.drain().await;
        task.await.unwrap();

        assert!(reader.reads() >= 3, "reads: {}", reader.reads());
    }
}
