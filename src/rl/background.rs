//! Background training loop
//!
//! A worker thread repeatedly runs `Trainer::train_step`, reports losses to an
//! optional callback and checkpoints every `save_every` ticks. Callback and
//! checkpoint failures are part of the tick outcome and never end the loop;
//! only `stop` does.

use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use burn::tensor::backend::AutodiffBackend;

use super::train::{CheckpointError, Trainer};

/// Error type loss callbacks may return
pub type CallbackError = Box<dyn Error + Send + Sync>;

/// Receives every loss produced by the loop
pub type LossCallback = Box<dyn FnMut(f32) -> Result<(), CallbackError> + Send>;

/// Timing and checkpoint settings for the loop
#[derive(Debug, Clone)]
pub struct LoopConfig {
    /// Pause between ticks
    pub interval: Duration,
    /// Checkpoint every this many ticks, 0 disables
    pub save_every: u64,
    /// Checkpoint path handed to `Trainer::save`
    pub checkpoint: PathBuf,
    /// Upper bound on how long `stop` waits for the worker
    pub stop_timeout: Duration,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            save_every: 5,
            checkpoint: PathBuf::from("models/latest_model"),
            stop_timeout: Duration::from_secs(2),
        }
    }
}

/// What happened during one tick
#[derive(Debug)]
pub struct TickOutcome {
    pub loss: Option<f32>,
    pub callback: Option<Result<(), CallbackError>>,
    pub save: Option<Result<PathBuf, CheckpointError>>,
}

struct Worker {
    stop_tx: Sender<()>,
    done_rx: Receiver<()>,
    thread: JoinHandle<()>,
}

/// Start/stop handle around the training worker thread
pub struct BackgroundTrainer<B: AutodiffBackend> {
    trainer: Arc<Trainer<B>>,
    config: LoopConfig,
    ticks: Arc<AtomicU64>,
    worker: Mutex<Option<Worker>>,
}

impl<B: AutodiffBackend> BackgroundTrainer<B> {
    pub fn new(trainer: Arc<Trainer<B>>, config: LoopConfig) -> Self {
        Self {
            trainer,
            config,
            ticks: Arc::new(AtomicU64::new(0)),
            worker: Mutex::new(None),
        }
    }

    /// Ticks completed across all runs
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.lock_worker()
            .as_ref()
            .is_some_and(|worker| !worker.thread.is_finished())
    }

    /// Launch the worker. Returns false, launching nothing, when one is already running.
    pub fn start(&self, loss_callback: Option<LossCallback>) -> bool {
        let mut worker = self.lock_worker();
        if worker.as_ref().is_some_and(|w| !w.thread.is_finished()) {
            return false;
        }

        let (stop_tx, stop_rx) = mpsc::channel();
        let (done_tx, done_rx) = mpsc::channel();
        let trainer = Arc::clone(&self.trainer);
        let ticks = Arc::clone(&self.ticks);
        let config = self.config.clone();

        let thread = thread::spawn(move || {
            run_loop(&trainer, &config, &ticks, loss_callback, &stop_rx);
            let _ = done_tx.send(());
        });

        *worker = Some(Worker {
            stop_tx,
            done_rx,
            thread,
        });
        tracing::info!(
            "Background trainer started (interval {:?}, save every {} ticks)",
            self.config.interval,
            self.config.save_every
        );
        true
    }

    /// Ask the worker to exit and wait at most `stop_timeout` for it.
    ///
    /// Returns true when the worker exited in time (or none was running).
    pub fn stop(&self) -> bool {
        let Some(worker) = self.lock_worker().take() else {
            return true;
        };

        let _ = worker.stop_tx.send(());
        match worker.done_rx.recv_timeout(self.config.stop_timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if worker.thread.join().is_err() {
                    tracing::warn!("Background trainer thread panicked");
                }
                tracing::info!("Background trainer stopped");
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                tracing::warn!(
                    "Background trainer did not stop within {:?}, detaching",
                    self.config.stop_timeout
                );
                false
            }
        }
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<Worker>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<B: AutodiffBackend> Drop for BackgroundTrainer<B> {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop<B: AutodiffBackend>(
    trainer: &Trainer<B>,
    config: &LoopConfig,
    ticks: &AtomicU64,
    mut loss_callback: Option<LossCallback>,
    stop_rx: &Receiver<()>,
) {
    let mut tick_index = 0u64;
    loop {
        tick_index += 1;
        let outcome = tick(trainer, config, tick_index, loss_callback.as_mut());
        ticks.fetch_add(1, Ordering::SeqCst);
        report(tick_index, &outcome);

        match stop_rx.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => break,
            Err(TryRecvError::Empty) => {}
        }

        match stop_rx.recv_timeout(config.interval) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }
}

/// One training step plus its callback and periodic checkpoint
pub fn tick<B: AutodiffBackend>(
    trainer: &Trainer<B>,
    config: &LoopConfig,
    tick_index: u64,
    loss_callback: Option<&mut LossCallback>,
) -> TickOutcome {
    let loss = trainer.train_step();

    let callback = match (loss, loss_callback) {
        (Some(loss), Some(callback)) => Some(
            panic::catch_unwind(AssertUnwindSafe(|| callback(loss)))
                .unwrap_or_else(|_| Err("loss callback panicked".into())),
        ),
        _ => None,
    };

    let save = (config.save_every > 0 && tick_index % config.save_every == 0)
        .then(|| trainer.save(&config.checkpoint));

    TickOutcome {
        loss,
        callback,
        save,
    }
}

fn report(tick_index: u64, outcome: &TickOutcome) {
    if let Some(loss) = outcome.loss {
        tracing::debug!("Tick {}: loss={:.4}", tick_index, loss);
    }
    if let Some(Err(err)) = &outcome.callback {
        tracing::warn!("Tick {}: loss callback failed: {}", tick_index, err);
    }
    if let Some(Err(err)) = &outcome.save {
        tracing::warn!("Tick {}: checkpoint failed: {}", tick_index, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rl::action_space::encode;
    use crate::rl::encoder::encode_state;
    use crate::rl::replay::EpisodeStore;
    use crate::rl::train::tests::{TestBackend, test_trainer};
    use shakmaty::Chess;
    use shakmaty::uci::Uci;
    use std::time::Instant;

    fn seeded_trainer() -> Arc<Trainer<TestBackend>> {
        let store = Arc::new(EpisodeStore::new(8));
        let uci: Uci = "d2d4".parse().unwrap();
        store.add(
            vec![encode_state(&Chess::default())],
            vec![encode(&uci).unwrap()],
            0.5,
        );
        Arc::new(test_trainer(store))
    }

    fn loop_config(dir: &tempfile::TempDir, interval_ms: u64, save_every: u64) -> LoopConfig {
        LoopConfig {
            interval: Duration::from_millis(interval_ms),
            save_every,
            checkpoint: dir.path().join("bg_model"),
            stop_timeout: Duration::from_secs(2),
        }
    }

    #[test]
    fn test_tick_reports_loss_and_saves_on_schedule() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = seeded_trainer();
        let config = loop_config(&dir, 10, 2);
        let mut callback: LossCallback = Box::new(|_| Ok(()));

        let first = tick(&trainer, &config, 1, Some(&mut callback));
        assert!(first.loss.is_some());
        assert!(matches!(first.callback, Some(Ok(()))));
        assert!(first.save.is_none());

        let second = tick(&trainer, &config, 2, Some(&mut callback));
        assert!(matches!(second.save, Some(Ok(_))));
    }

    #[test]
    fn test_tick_isolates_callback_failures() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = seeded_trainer();
        let config = loop_config(&dir, 10, 0);

        let mut failing: LossCallback = Box::new(|_| Err("disk full".into()));
        let outcome = tick(&trainer, &config, 1, Some(&mut failing));
        assert!(matches!(outcome.callback, Some(Err(_))));

        let mut panicking: LossCallback = Box::new(|_| panic!("boom"));
        let outcome = tick(&trainer, &config, 2, Some(&mut panicking));
        assert!(matches!(outcome.callback, Some(Err(_))));
    }

    #[test]
    fn test_tick_on_empty_store_skips_callback() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = Arc::new(test_trainer(Arc::new(EpisodeStore::new(4))));
        let config = loop_config(&dir, 10, 0);
        let mut callback: LossCallback = Box::new(|_| panic!("no loss expected"));

        let outcome = tick(&trainer, &config, 1, Some(&mut callback));
        assert!(outcome.loss.is_none());
        assert!(outcome.callback.is_none());
    }

    #[test]
    fn test_loop_survives_failing_callback() {
        let dir = tempfile::tempdir().unwrap();
        let background = BackgroundTrainer::new(seeded_trainer(), loop_config(&dir, 5, 0));
        let calls = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&calls);

        assert!(background.start(Some(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err("always fails".into())
        }))));

        let deadline = Instant::now() + Duration::from_secs(10);
        while calls.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(calls.load(Ordering::SeqCst) >= 3);
        assert!(background.is_running());
        assert!(background.stop());
    }

    #[test]
    fn test_start_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let background = BackgroundTrainer::new(seeded_trainer(), loop_config(&dir, 20, 0));

        assert!(background.start(None));
        assert!(!background.start(None));
        assert!(background.is_running());

        // one loop sleeps 20ms per tick, a second loop would double the rate
        let before = background.ticks();
        thread::sleep(Duration::from_millis(200));
        let ticked = background.ticks() - before;
        assert!(ticked >= 1);
        assert!(ticked <= 12, "{} ticks in 200ms", ticked);

        assert!(background.stop());
        assert!(!background.is_running());

        // a stopped trainer can be started again
        assert!(background.start(None));
        assert!(background.stop());
    }

    #[test]
    fn test_stop_gives_up_on_wedged_worker() {
        let dir = tempfile::tempdir().unwrap();
        let config = LoopConfig {
            stop_timeout: Duration::from_millis(100),
            ..loop_config(&dir, 10, 0)
        };
        let background = BackgroundTrainer::new(seeded_trainer(), config);

        let entered = Arc::new(AtomicU64::new(0));
        let flag = Arc::clone(&entered);
        assert!(background.start(Some(Box::new(move |_| {
            flag.store(1, Ordering::SeqCst);
            thread::sleep(Duration::from_secs(3));
            Ok(())
        }))));

        let deadline = Instant::now() + Duration::from_secs(10);
        while entered.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(entered.load(Ordering::SeqCst), 1);

        let started = Instant::now();
        assert!(!background.stop());
        assert!(started.elapsed() < Duration::from_millis(500));
        assert!(!background.is_running());
    }

    #[test]
    fn test_stop_interrupts_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let background = BackgroundTrainer::new(seeded_trainer(), loop_config(&dir, 60_000, 0));
        assert!(background.start(None));

        let deadline = Instant::now() + Duration::from_secs(10);
        while background.ticks() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }

        let started = Instant::now();
        assert!(background.stop());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(background.ticks(), 1);
    }

    #[test]
    fn test_stop_without_start() {
        let dir = tempfile::tempdir().unwrap();
        let background = BackgroundTrainer::new(seeded_trainer(), loop_config(&dir, 10, 0));
        assert!(background.stop());
    }
}
