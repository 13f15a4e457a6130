//! Result presentation.
//!
//! The presenter owns the visible label text. A dedicated thread is the only
//! mutator; callbacks firing on engine threads hand their rendering off
//! through a channel instead of touching the label directly.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use anyhow::{Context, Result};
use crossbeam_channel::Sender;

use crate::analyze::{render_top_labels, LabelScore};

/// How many ranked entries the label shows.
pub const LABEL_TOP_N: usize = 5;

enum Message {
    Show(String),
    Stop,
}

/// The visible-label owner. Stops and joins its thread on drop.
pub struct Presenter {
    label: Arc<Mutex<String>>,
    updates: Arc<AtomicU64>,
    tx: Option<Sender<Message>>,
    thread: Option<JoinHandle<()>>,
}

/// Cloneable hand-off used by request callbacks.
#[derive(Clone)]
pub struct PresenterHandle {
    tx: Sender<Message>,
}

impl Presenter {
    /// Start the presenter thread. With `echo` set, every label update is
    /// also written to stdout (the daemon's textual display).
    pub fn start(echo: bool) -> Result<Self> {
        let label = Arc::new(Mutex::new(String::new()));
        let updates = Arc::new(AtomicU64::new(0));
        let (tx, rx) = crossbeam_channel::unbounded::<Message>();

        let thread_label = label.clone();
        let thread_updates = updates.clone();
        let thread = std::thread::Builder::new()
            .name("result-presenter".to_string())
            .spawn(move || {
                // The loop ends on an explicit Stop, not on sender
                // disconnect: request callbacks hold handles for as long as
                // the request set lives, which outlasts shutdown.
                for message in rx {
                    let text = match message {
                        Message::Show(text) => text,
                        Message::Stop => break,
                    };
                    {
                        let mut label = thread_label.lock().unwrap_or_else(|e| e.into_inner());
                        *label = text.clone();
                    }
                    thread_updates.fetch_add(1, Ordering::Release);
                    if echo {
                        println!("{}", text);
                    }
                }
            })
            .context("spawn presenter thread")?;

        Ok(Self {
            label,
            updates,
            tx: Some(tx),
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> Result<PresenterHandle> {
        let tx = self.tx.as_ref().context("presenter stopped")?;
        Ok(PresenterHandle { tx: tx.clone() })
    }

    /// Current label text.
    pub fn label(&self) -> String {
        self.label
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Number of label updates applied so far. Never exceeds the number of
    /// classification results handed off.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Acquire)
    }

    /// Stop after applying pending updates and wait for the thread.
    ///
    /// Handles held by callbacks stay valid; anything they send after the
    /// stop is discarded.
    pub fn stop(&mut self) {
        if let Some(tx) = self.tx.take() {
            let _ = tx.send(Message::Stop);
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for Presenter {
    fn drop(&mut self) {
        self.stop();
    }
}

impl PresenterHandle {
    /// Render a ranked classification result and hand it to the presenter
    /// thread. Safe to call from any thread; drops silently once the
    /// presenter has stopped.
    pub fn show_classification(&self, labels: &[LabelScore]) {
        let _ = self
            .tx
            .send(Message::Show(render_top_labels(labels, LABEL_TOP_N)));
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    fn wait_for_updates(presenter: &Presenter, expected: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while presenter.updates() < expected && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn label_shows_top_five_entries() -> Result<()> {
        let presenter = Presenter::start(false)?;
        let handle = presenter.handle()?;

        handle.show_classification(&[
            LabelScore::new("cat", 0.91),
            LabelScore::new("dog", 0.04),
            LabelScore::new("fox", 0.02),
            LabelScore::new("cow", 0.01),
            LabelScore::new("pig", 0.01),
            LabelScore::new("owl", 0.01),
        ]);

        wait_for_updates(&presenter, 1);
        assert_eq!(presenter.label(), "cat 91\ndog 4\nfox 2\ncow 1\npig 1");
        Ok(())
    }

    #[test]
    fn updates_count_one_per_result() -> Result<()> {
        let mut presenter = Presenter::start(false)?;
        let handle = presenter.handle()?;

        for i in 0..4 {
            handle.show_classification(&[LabelScore::new(format!("label{}", i), 0.5)]);
        }
        wait_for_updates(&presenter, 4);
        presenter.stop();

        assert_eq!(presenter.updates(), 4);
        assert_eq!(presenter.label(), "label3 50");
        Ok(())
    }

    #[test]
    fn stop_returns_while_handles_are_still_alive() -> Result<()> {
        let mut presenter = Presenter::start(false)?;
        let handle = presenter.handle()?;
        handle.show_classification(&[LabelScore::new("cat", 0.9)]);
        wait_for_updates(&presenter, 1);

        // The handle outlives stop(), like callbacks in a live request set.
        let (tx, rx) = crossbeam_channel::bounded::<()>(1);
        let stopper = std::thread::spawn(move || {
            presenter.stop();
            let _ = tx.send(());
            presenter
        });
        assert!(
            rx.recv_timeout(Duration::from_secs(5)).is_ok(),
            "stop() hung with a live handle"
        );

        let presenter = stopper.join().expect("stop thread");
        assert_eq!(presenter.label(), "cat 90");
        handle.show_classification(&[LabelScore::new("dog", 0.5)]);
        assert_eq!(presenter.label(), "cat 90");
        Ok(())
    }

    #[test]
    fn handles_from_multiple_threads_converge_on_one_owner() -> Result<()> {
        let presenter = Presenter::start(false)?;
        let mut joins = Vec::new();
        for i in 0..3 {
            let handle = presenter.handle()?;
            joins.push(std::thread::spawn(move || {
                handle.show_classification(&[LabelScore::new(format!("thread{}", i), 1.0)]);
            }));
        }
        for join in joins {
            join.join().expect("sender thread");
        }

        wait_for_updates(&presenter, 3);
        assert_eq!(presenter.updates(), 3);
        assert!(presenter.label().starts_with("thread"));
        Ok(())
    }
}
