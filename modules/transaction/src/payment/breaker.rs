//! Circuit breaker guarding the payment provider.
//!
//! Closed counts outcomes over a fixed window and trips to Open once the
//! window holds enough traffic with a high enough failure ratio. Open
//! refuses calls outright until its timeout elapses, then HalfOpen admits a
//! bounded number of trial calls: one success closes the circuit, one
//! failure re-opens it.
//!
//! Transitions out of Open are announced on a watch channel; the recovery
//! forwarder turns those into `midtrans:recovery` stream entries so blocked
//! token workers wake up.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

impl BreakerState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakerState::Closed => "closed",
            BreakerState::Open => "open",
            BreakerState::HalfOpen => "half-open",
        }
    }
}

/// A state change worth announcing.
#[derive(Debug, Clone, Copy)]
pub struct StateChange {
    pub from: BreakerState,
    pub to: BreakerState,
}

impl StateChange {
    /// Only leaving Open means the provider may be back; that is the signal
    /// blocked recovery workers wait for.
    pub fn is_recovery(&self) -> bool {
        self.from == BreakerState::Open
            && matches!(self.to, BreakerState::Closed | BreakerState::HalfOpen)
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Counts {
    requests: u32,
    failures: u32,
    consecutive_successes: u32,
}

#[derive(Debug)]
struct Inner {
    state: BreakerState,
    counts: Counts,
    /// Current counting window (Closed) or open-state generation. Calls
    /// report against the generation they started in; stale reports are
    /// dropped.
    generation: u64,
    /// When the window rolls (Closed) or the open timeout elapses (Open).
    deadline: Instant,
    half_open_inflight: u32,
}

#[derive(Debug, Clone)]
pub struct BreakerSettings {
    /// Closed-state counting window.
    pub interval: Duration,
    /// Open-state duration before trialing.
    pub timeout: Duration,
    /// Trial calls admitted in HalfOpen.
    pub max_requests: u32,
    /// Trip threshold: minimum observed requests in the window…
    pub min_requests: u32,
    /// …and the failure ratio that must be reached.
    pub failure_ratio: f64,
}

impl Default for BreakerSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            timeout: Duration::from_secs(10),
            max_requests: 3,
            min_requests: 5,
            failure_ratio: 0.6,
        }
    }
}

/// Process-wide failure gate, one per provider.
pub struct CircuitBreaker {
    name: &'static str,
    settings: BreakerSettings,
    inner: Mutex<Inner>,
    state_tx: mpsc::UnboundedSender<StateChange>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BreakerError {
    /// Circuit is open, the call was refused without touching the provider.
    #[error("circuit breaker is open")]
    Open,
    /// HalfOpen and the trial quota is taken.
    #[error("too many requests while half-open")]
    TooManyRequests,
}

impl CircuitBreaker {
    /// Returns the breaker and the receiver of its state changes.
    pub fn new(
        name: &'static str,
        settings: BreakerSettings,
    ) -> (Self, mpsc::UnboundedReceiver<StateChange>) {
        let (state_tx, state_rx) = mpsc::unbounded_channel();
        let breaker = Self {
            name,
            inner: Mutex::new(Inner {
                state: BreakerState::Closed,
                counts: Counts::default(),
                generation: 0,
                deadline: Instant::now() + settings.interval,
                half_open_inflight: 0,
            }),
            settings,
            state_tx,
        };
        (breaker, state_rx)
    }

    pub fn state(&self) -> BreakerState {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        self.roll(&mut inner, Instant::now());
        inner.state
    }

    /// Admission check. Returns the generation token the caller must report
    /// its outcome against.
    fn before_call(&self) -> Result<u64, BreakerError> {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        let now = Instant::now();
        self.roll(&mut inner, now);

        match inner.state {
            BreakerState::Closed => {
                inner.counts.requests += 1;
                Ok(inner.generation)
            }
            BreakerState::Open => Err(BreakerError::Open),
            BreakerState::HalfOpen => {
                if inner.half_open_inflight >= self.settings.max_requests {
                    return Err(BreakerError::TooManyRequests);
                }
                inner.half_open_inflight += 1;
                Ok(inner.generation)
            }
        }
    }

    fn on_success(&self, generation: u64) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.generation != generation {
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.counts.consecutive_successes += 1;
            }
            BreakerState::HalfOpen => {
                // One good trial call is proof enough the provider is back.
                self.transition(&mut inner, BreakerState::Closed);
            }
            BreakerState::Open => {}
        }
    }

    fn on_failure(&self, generation: u64) {
        let mut inner = self.inner.lock().expect("breaker lock poisoned");
        if inner.generation != generation {
            return;
        }

        match inner.state {
            BreakerState::Closed => {
                inner.counts.failures += 1;
                inner.counts.consecutive_successes = 0;
                let counts = inner.counts;
                if counts.requests >= self.settings.min_requests
                    && f64::from(counts.failures) / f64::from(counts.requests)
                        >= self.settings.failure_ratio
                {
                    self.transition(&mut inner, BreakerState::Open);
                }
            }
            BreakerState::HalfOpen => {
                self.transition(&mut inner, BreakerState::Open);
            }
            BreakerState::Open => {}
        }
    }

    /// Advance expired windows/timeouts before acting on state.
    fn roll(&self, inner: &mut Inner, now: Instant) {
        match inner.state {
            BreakerState::Closed => {
                if now >= inner.deadline {
                    inner.counts = Counts::default();
                    inner.generation += 1;
                    inner.deadline = now + self.settings.interval;
                }
            }
            BreakerState::Open => {
                if now >= inner.deadline {
                    self.transition(inner, BreakerState::HalfOpen);
                }
            }
            BreakerState::HalfOpen => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: BreakerState) {
        let from = inner.state;
        if from == to {
            return;
        }

        inner.state = to;
        inner.generation += 1;
        inner.counts = Counts::default();
        inner.half_open_inflight = 0;
        inner.deadline = Instant::now()
            + match to {
                BreakerState::Closed => self.settings.interval,
                BreakerState::Open => self.settings.timeout,
                BreakerState::HalfOpen => self.settings.timeout,
            };

        tracing::warn!(
            breaker = self.name,
            from = from.as_str(),
            to = to.as_str(),
            "circuit breaker state change"
        );

        // Receiver lagging or gone must never block the breaker.
        let _ = self.state_tx.send(StateChange { from, to });
    }

    /// Run `operation` under the breaker's admission control.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<Result<T, E>, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let generation = self.before_call()?;

        let result = operation().await;
        match &result {
            Ok(_) => self.on_success(generation),
            Err(_) => self.on_failure(generation),
        }

        Ok(result)
    }
}
