//! Concurrent fragment rendering.
//!
//! Each fragment becomes its own task, bounded by a semaphore so a long reply
//! cannot flood the synthesis provider. Tasks report on a single channel in
//! whatever order they finish; the sequencer restores the order.

use crate::error::Result;
use crate::pipeline::types::{Fragment, RenderOutcome, RenderedFragment};
use crate::providers::tts::Synthesizer;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::AbortHandle;

/// Outcomes waiting to be read by the session.
const OUTCOME_BUFFER: usize = 32;

/// Pool of cancellable render tasks keyed by fragment index.
pub struct RenderPool {
    synthesizer: Arc<dyn Synthesizer>,
    semaphore: Arc<Semaphore>,
    outcomes: mpsc::Sender<RenderOutcome>,
    tasks: HashMap<u64, AbortHandle>,
}

impl RenderPool {
    /// Creates a pool and the receiver its outcomes arrive on.
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        max_concurrent: usize,
    ) -> (Self, mpsc::Receiver<RenderOutcome>) {
        let (outcomes, rx) = mpsc::channel(OUTCOME_BUFFER);
        let pool = Self {
            synthesizer,
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            outcomes,
            tasks: HashMap::new(),
        };
        (pool, rx)
    }

    /// Start rendering `fragment`.
    ///
    /// Returns false without spawning anything if the text is blank; no
    /// outcome will be reported for it.
    pub fn submit(&mut self, fragment: Fragment) -> bool {
        if fragment.text.trim().is_empty() {
            return false;
        }

        self.tasks.retain(|_, handle| !handle.is_finished());

        let index = fragment.index;
        let synthesizer = self.synthesizer.clone();
        let semaphore = self.semaphore.clone();
        let outcomes = self.outcomes.clone();

        let handle = tokio::spawn(async move {
            // Hold permit until done
            let Ok(_permit) = semaphore.acquire_owned().await else {
                return;
            };

            let outcome = match synthesizer.synthesize(&fragment.text).await {
                Ok(audio) => RenderOutcome::Rendered(RenderedFragment {
                    index: fragment.index,
                    turn: fragment.turn,
                    audio,
                }),
                Err(e) => {
                    tracing::warn!(index = fragment.index, error = %e, "render failed");
                    RenderOutcome::Failed {
                        index: fragment.index,
                        turn: fragment.turn,
                        error: e.to_string(),
                    }
                }
            };

            if outcomes.send(outcome).await.is_err() {
                tracing::debug!(index = fragment.index, "render outcome dropped, session gone");
            }
        });

        self.tasks.insert(index, handle.abort_handle());
        true
    }

    /// Render one fragment directly, outside the pool.
    pub async fn render(&self, fragment: &Fragment) -> Result<RenderedFragment> {
        let audio = self.synthesizer.synthesize(&fragment.text).await?;
        Ok(RenderedFragment {
            index: fragment.index,
            turn: fragment.turn,
            audio,
        })
    }

    /// Render tasks not yet finished.
    pub fn in_flight(&self) -> usize {
        self.tasks
            .values()
            .filter(|handle| !handle.is_finished())
            .count()
    }

    /// Abort every outstanding render. Returns how many were still running.
    pub fn cancel_all(&mut self) -> usize {
        let mut cancelled = 0;
        for (_, handle) in self.tasks.drain() {
            if !handle.is_finished() {
                handle.abort();
                cancelled += 1;
            }
        }
        cancelled
    }
}

impl Drop for RenderPool {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
