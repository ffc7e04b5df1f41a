//! Lifecycle state machine for the index manager.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::panic::catch_unwind;
use std::sync::Mutex;

use crate::error::CodeIntelErr;
use crate::error::Result;
use crate::types::now_unix;

/// Transition history retained in the ring buffer.
const MAX_TRANSITIONS: usize = 100;

/// Index lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Indexing,
    Ready,
    /// Indexing finished but some files or embeddings failed; the index is
    /// usable.
    Partial,
    Error,
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Indexing => "indexing",
            LifecycleState::Ready => "ready",
            LifecycleState::Partial => "partial",
            LifecycleState::Error => "error",
        }
    }

    fn can_transition_to(&self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Uninitialized, Indexing)
                | (Indexing, Ready)
                | (Indexing, Partial)
                | (Indexing, Error)
                | (Ready, Indexing)
                | (Ready, Uninitialized)
                | (Partial, Indexing)
                | (Partial, Uninitialized)
                | (Error, Uninitialized)
                | (Error, Indexing)
        )
    }
}

/// Indexing phase reported with progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexPhase {
    Analyzing,
    Processing,
    Embedding,
}

impl IndexPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            IndexPhase::Analyzing => "analyzing",
            IndexPhase::Processing => "processing",
            IndexPhase::Embedding => "embedding",
        }
    }
}

/// Progress snapshot, present only while `indexing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
    pub phase: IndexPhase,
}

/// One recorded transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: LifecycleState,
    pub to: LifecycleState,
    pub at: i64,
}

type Observer = std::sync::Arc<dyn Fn(LifecycleState, LifecycleState) + Send + Sync>;

struct Inner {
    state: LifecycleState,
    progress: Option<Progress>,
    transitions: VecDeque<Transition>,
    observers: Vec<Observer>,
}

/// State machine coordinating initialize -> indexing -> ready/partial/error.
///
/// Invalid transitions fail loudly; observer panics are caught and logged,
/// never propagated.
pub struct LifecycleManager {
    inner: Mutex<Inner>,
}

impl Default for LifecycleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleManager {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: LifecycleState::Uninitialized,
                progress: None,
                transitions: VecDeque::new(),
                observers: Vec::new(),
            }),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.lock().state
    }

    /// Progress while `indexing`, `None` otherwise.
    pub fn progress(&self) -> Option<Progress> {
        self.lock().progress
    }

    /// Attempt a transition, notifying observers on success.
    pub fn transition(&self, next: LifecycleState) -> Result<()> {
        let (from, observers) = {
            let mut inner = self.lock();
            let from = inner.state;
            if !from.can_transition_to(next) {
                return Err(CodeIntelErr::InvalidTransition {
                    from: from.as_str().to_string(),
                    to: next.as_str().to_string(),
                });
            }
            Self::record(&mut inner, from, next);
            (from, inner.observers.clone())
        };

        Self::notify(&observers, from, next);
        Ok(())
    }

    /// Unconditionally return to `uninitialized`.
    pub fn reset(&self) {
        let (from, observers) = {
            let mut inner = self.lock();
            let from = inner.state;
            Self::record(&mut inner, from, LifecycleState::Uninitialized);
            (from, inner.observers.clone())
        };
        Self::notify(&observers, from, LifecycleState::Uninitialized);
    }

    /// Update progress. Only legal while `indexing`.
    pub fn set_progress(&self, current: usize, total: usize, phase: IndexPhase) -> Result<()> {
        let mut inner = self.lock();
        if inner.state != LifecycleState::Indexing {
            return Err(CodeIntelErr::InvalidTransition {
                from: inner.state.as_str().to_string(),
                to: "progress update".to_string(),
            });
        }
        inner.progress = Some(Progress {
            current,
            total,
            phase,
        });
        Ok(())
    }

    /// Subscribe to state changes.
    pub fn on_state_change<F>(&self, observer: F)
    where
        F: Fn(LifecycleState, LifecycleState) + Send + Sync + 'static,
    {
        self.lock().observers.push(std::sync::Arc::new(observer));
    }

    /// Recent transitions, oldest first (ring buffer of 100).
    pub fn history(&self) -> Vec<Transition> {
        self.lock().transitions.iter().cloned().collect()
    }

    fn record(inner: &mut Inner, from: LifecycleState, to: LifecycleState) {
        inner.state = to;
        // Progress is only meaningful while indexing.
        if to != LifecycleState::Indexing {
            inner.progress = None;
        }
        inner.transitions.push_back(Transition {
            from,
            to,
            at: now_unix(),
        });
        while inner.transitions.len() > MAX_TRANSITIONS {
            inner.transitions.pop_front();
        }
    }

    fn notify(observers: &[Observer], from: LifecycleState, to: LifecycleState) {
        // Observers run outside the state lock; panics are contained.
        for observer in observers {
            if catch_unwind(AssertUnwindSafe(|| observer(from, to))).is_err() {
                tracing::warn!(
                    from = from.as_str(),
                    to = to.as_str(),
                    "lifecycle observer panicked"
                );
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    #[test]
    fn happy_path_transitions() {
        let lifecycle = LifecycleManager::new();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);

        lifecycle.transition(LifecycleState::Indexing).unwrap();
        lifecycle.transition(LifecycleState::Ready).unwrap();
        lifecycle.transition(LifecycleState::Indexing).unwrap();
        lifecycle.transition(LifecycleState::Partial).unwrap();
        assert_eq!(lifecycle.state(), LifecycleState::Partial);
    }

    #[test]
    fn invalid_transition_is_loud() {
        let lifecycle = LifecycleManager::new();
        let result = lifecycle.transition(LifecycleState::Ready);
        assert!(matches!(
            result,
            Err(CodeIntelErr::InvalidTransition { .. })
        ));
        // State unchanged after the failed transition.
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn progress_only_while_indexing() {
        let lifecycle = LifecycleManager::new();
        assert!(lifecycle.set_progress(1, 10, IndexPhase::Analyzing).is_err());

        lifecycle.transition(LifecycleState::Indexing).unwrap();
        lifecycle.set_progress(3, 10, IndexPhase::Processing).unwrap();
        let progress = lifecycle.progress().unwrap();
        assert_eq!(progress.current, 3);
        assert_eq!(progress.phase, IndexPhase::Processing);

        // Progress clears on exit from indexing.
        lifecycle.transition(LifecycleState::Ready).unwrap();
        assert!(lifecycle.progress().is_none());
    }

    #[test]
    fn reset_is_unconditional() {
        let lifecycle = LifecycleManager::new();
        lifecycle.transition(LifecycleState::Indexing).unwrap();
        lifecycle.transition(LifecycleState::Error).unwrap();
        lifecycle.reset();
        assert_eq!(lifecycle.state(), LifecycleState::Uninitialized);
    }

    #[test]
    fn observers_see_transitions_and_panics_are_contained() {
        let lifecycle = LifecycleManager::new();
        let seen = Arc::new(AtomicUsize::new(0));

        let seen_by_observer = seen.clone();
        lifecycle.on_state_change(move |_, _| {
            seen_by_observer.fetch_add(1, Ordering::SeqCst);
        });
        lifecycle.on_state_change(|_, to| {
            if to == LifecycleState::Ready {
                panic!("observer bug");
            }
        });

        lifecycle.transition(LifecycleState::Indexing).unwrap();
        lifecycle.transition(LifecycleState::Ready).unwrap();
        // Both transitions observed despite the second observer panicking.
        assert_eq!(seen.load(Ordering::SeqCst), 2);
        assert_eq!(lifecycle.state(), LifecycleState::Ready);
    }

    #[test]
    fn history_is_bounded() {
        let lifecycle = LifecycleManager::new();
        for _ in 0..120 {
            lifecycle.transition(LifecycleState::Indexing).unwrap();
            lifecycle.transition(LifecycleState::Ready).unwrap();
            lifecycle.reset();
        }
        assert_eq!(lifecycle.history().len(), MAX_TRANSITIONS);
    }
}
