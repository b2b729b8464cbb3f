use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressState, ProgressStyle};
use mdscatter::engine::progress::{Progress, ProgressCallback};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};

#[derive(Debug)]
pub enum UiEvent {
    Progress(Progress),
    Log(String),
}

/// Owns the terminal while a command runs.
///
/// Each job phase gets a spinner, which becomes a step bar once the executor announces its
/// step count. Finished phases are replaced by a one-line summary; log lines go above.
pub struct UiManager {
    mp: Arc<MultiProgress>,
    phase: Option<PhaseLine>,
    event_receiver: mpsc::Receiver<UiEvent>,
    shutdown_receiver: watch::Receiver<bool>,
    _sentinel_bar: ProgressBar,
}

struct PhaseLine {
    name: &'static str,
    bar: ProgressBar,
    started: Instant,
    steps: Option<u64>,
}

impl PhaseLine {
    fn summary(&self) -> String {
        let elapsed = self.started.elapsed().as_secs_f64();
        match self.steps {
            Some(total) => format!(
                "✓ {} ({}/{} steps, {:.1}s)",
                self.name,
                self.bar.position(),
                total,
                elapsed
            ),
            None => format!("✓ {} ({:.1}s)", self.name, elapsed),
        }
    }
}

impl UiManager {
    pub fn new() -> (Self, mpsc::Sender<UiEvent>, watch::Sender<bool>) {
        let (event_sender, event_receiver) = mpsc::channel(1024);
        let (shutdown_sender, shutdown_receiver) = watch::channel(false);
        let mp = Arc::new(MultiProgress::new());
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(12));
        let _sentinel_bar = mp.add(ProgressBar::hidden());
        let manager = Self {
            mp,
            phase: None,
            event_receiver,
            shutdown_receiver,
            _sentinel_bar,
        };

        (manager, event_sender, shutdown_sender)
    }

    pub async fn run(mut self) {
        loop {
            tokio::select! {
                Some(event) = self.event_receiver.recv() => {
                    self.handle_event(event);
                }
                result = self.shutdown_receiver.changed() => {
                    if result.is_err() || *self.shutdown_receiver.borrow() {
                        break;
                    }
                }
            }
        }
        while let Ok(event) = self.event_receiver.try_recv() {
            self.handle_event(event);
        }
        // A phase still open here was interrupted.
        if let Some(phase) = self.phase.take() {
            phase.bar.abandon();
        }
        self._sentinel_bar.finish_and_clear();
    }

    fn handle_event(&mut self, event: UiEvent) {
        match event {
            UiEvent::Log(msg) => {
                self.mp.println(msg).ok();
            }
            UiEvent::Progress(progress) => self.handle_progress(progress),
        }
    }

    fn close_phase(&mut self) {
        if let Some(phase) = self.phase.take() {
            phase.bar.finish_and_clear();
            self.mp.println(phase.summary()).ok();
        }
    }

    fn handle_progress(&mut self, progress: Progress) {
        match progress {
            Progress::PhaseStart { name } => {
                self.close_phase();
                let bar = self.mp.add(ProgressBar::new_spinner());
                bar.enable_steady_tick(Duration::from_millis(80));
                bar.set_style(Self::spinner_style());
                bar.set_message(name);
                self.phase = Some(PhaseLine {
                    name,
                    bar,
                    started: Instant::now(),
                    steps: None,
                });
            }
            Progress::PhaseFinish => self.close_phase(),
            Progress::TaskStart { total_steps } => {
                if let Some(phase) = self.phase.as_mut() {
                    phase.steps = Some(total_steps);
                    phase.bar.disable_steady_tick();
                    phase.bar.set_style(Self::bar_style());
                    phase.bar.set_length(total_steps);
                    phase.bar.set_position(0);
                }
            }
            Progress::TaskIncrement => {
                if let Some(phase) = self.phase.as_ref() {
                    phase.bar.inc(1);
                }
            }
            Progress::TaskFinish => {
                if let Some(phase) = self.phase.as_ref() {
                    phase.bar.finish();
                }
            }
            Progress::Message(msg) => {
                self.mp.println(format!("  {}", msg)).ok();
            }
        }
    }

    fn spinner_style() -> ProgressStyle {
        ProgressStyle::with_template("{spinner:.green} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"])
    }

    fn bar_style() -> ProgressStyle {
        ProgressStyle::with_template("{msg:<14} [{bar:40.cyan/blue}] {pos}/{len} steps ({eta})")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .with_key(
                "eta",
                |state: &ProgressState, w: &mut dyn std::fmt::Write| {
                    let _ = write!(w, "{:.1}s", state.eta().as_secs_f64());
                },
            )
            .progress_chars("━╸ ")
    }
}

/// Turns engine progress events into UI events.
#[derive(Clone)]
pub struct CliProgressHandler {
    sender: mpsc::Sender<UiEvent>,
}

impl CliProgressHandler {
    pub fn new(sender: mpsc::Sender<UiEvent>) -> Self {
        Self { sender }
    }

    pub fn get_callback(&self) -> ProgressCallback<'static> {
        let sender = self.sender.clone();
        Box::new(move |progress: Progress| {
            // A full channel only drops a redraw.
            let _ = sender.try_send(UiEvent::Progress(progress));
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_manager() -> UiManager {
        let (manager, _, _) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        manager
    }

    fn send(manager: &mut UiManager, progress: Progress) {
        manager.handle_event(UiEvent::Progress(progress));
    }

    fn phase_name(manager: &UiManager) -> Option<&'static str> {
        manager.phase.as_ref().map(|p| p.name)
    }

    #[test]
    fn each_phase_replaces_the_previous_one() {
        let mut manager = setup_manager();
        assert!(phase_name(&manager).is_none());

        send(&mut manager, Progress::PhaseStart { name: "Configuration" });
        assert_eq!(phase_name(&manager), Some("Configuration"));
        assert_eq!(manager.phase.as_ref().unwrap().bar.message(), "Configuration");

        send(&mut manager, Progress::PhaseStart { name: "Running" });
        assert_eq!(phase_name(&manager), Some("Running"));

        send(&mut manager, Progress::PhaseFinish);
        assert!(manager.phase.is_none());
    }

    #[test]
    fn step_events_drive_the_bar_and_the_summary() {
        let mut manager = setup_manager();
        send(&mut manager, Progress::PhaseStart { name: "Running" });
        send(&mut manager, Progress::TaskStart { total_steps: 20 });

        let phase = manager.phase.as_ref().unwrap();
        assert_eq!(phase.bar.length(), Some(20));
        assert_eq!(phase.bar.position(), 0);

        for _ in 0..5 {
            send(&mut manager, Progress::TaskIncrement);
        }
        let phase = manager.phase.as_ref().unwrap();
        assert_eq!(phase.bar.position(), 5);
        assert!(phase.summary().starts_with("✓ Running (5/20 steps"));

        send(&mut manager, Progress::TaskFinish);
        assert!(manager.phase.as_ref().unwrap().bar.is_finished());
    }

    #[test]
    fn step_events_outside_a_phase_are_ignored() {
        let mut manager = setup_manager();
        send(&mut manager, Progress::TaskStart { total_steps: 3 });
        send(&mut manager, Progress::TaskIncrement);
        send(&mut manager, Progress::Message("Writing output".to_string()));
        manager.handle_event(UiEvent::Log("INFO done".to_string()));
        assert!(manager.phase.is_none());
    }

    #[tokio::test]
    async fn progress_handler_forwards_engine_events() {
        let (sender, mut receiver) = mpsc::channel(1);
        let callback = CliProgressHandler::new(sender).get_callback();

        callback(Progress::TaskStart { total_steps: 7 });
        // Dropped, the channel holds a single event.
        callback(Progress::TaskIncrement);

        match receiver.recv().await.unwrap() {
            UiEvent::Progress(Progress::TaskStart { total_steps }) => assert_eq!(total_steps, 7),
            other => panic!("Incorrect event received: {other:?}"),
        }
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn manager_drains_pending_events_on_shutdown() {
        let (manager, sender, shutdown) = UiManager::new();
        manager.mp.set_draw_target(ProgressDrawTarget::hidden());
        let handle = tokio::spawn(manager.run());
        sender
            .send(UiEvent::Progress(Progress::PhaseStart { name: "Running" }))
            .await
            .unwrap();
        sender.send(UiEvent::Log("last words".into())).await.unwrap();
        shutdown.send(true).unwrap();
        handle.await.unwrap();
    }
}
