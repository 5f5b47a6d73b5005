//! Authentication state machine.
//!
//! `SignedOut -> Authenticating -> SignedIn`, and back to `SignedOut` on
//! sign-out, expiry or a rejected token. Only one sign-in runs at a time;
//! callers arriving while it runs are parked as waiters and all receive its
//! outcome.
//!
//! Every sign-in and every sign-out bumps an epoch. A finishing sign-in whose
//! epoch is stale was overtaken by a sign-out and is dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::auth::Session;
use crate::error::{DirectoryResult, ManagerError, ManagerResult};

type Waiter = oneshot::Sender<ManagerResult<()>>;

/// Observable authentication state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    SignedOut,
    Authenticating,
    SignedIn,
}

enum Phase {
    SignedOut,
    Authenticating { waiters: Vec<Waiter> },
    SignedIn { session: Arc<Session> },
}

struct Inner {
    phase: Phase,
    epoch: u64,
}

/// The session a remote call runs under.
#[derive(Debug, Clone)]
pub(crate) struct ActiveSession {
    pub session: Arc<Session>,
    pub epoch: u64,
}

/// What a caller of `authenticate` has to do next.
pub(crate) enum Begin {
    /// A valid session exists.
    Ready,
    /// Another caller's sign-in is running.
    Wait(oneshot::Receiver<ManagerResult<()>>),
    /// This caller must run the sign-in and report it with `finish(epoch, ..)`.
    Start {
        epoch: u64,
        outcome: oneshot::Receiver<ManagerResult<()>>,
    },
}

pub(crate) struct SessionState {
    inner: Mutex<Inner>,
    expiry_skew: Duration,
}

impl SessionState {
    pub fn new(expiry_skew: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::SignedOut,
                epoch: 0,
            }),
            expiry_skew,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> AuthState {
        match &self.lock().phase {
            Phase::SignedOut => AuthState::SignedOut,
            Phase::Authenticating { .. } => AuthState::Authenticating,
            Phase::SignedIn { session } if session.is_expired(self.expiry_skew) => {
                AuthState::SignedOut
            }
            Phase::SignedIn { .. } => AuthState::SignedIn,
        }
    }

    /// The current session, if signed in and not expired.
    ///
    /// An expired session is dropped on the way.
    pub fn active(&self) -> Option<ActiveSession> {
        let mut inner = self.lock();
        let session = match &inner.phase {
            Phase::SignedIn { session } => Arc::clone(session),
            _ => return None,
        };

        if session.is_expired(self.expiry_skew) {
            info!("Session expired, signing out");
            inner.phase = Phase::SignedOut;
            return None;
        }

        Some(ActiveSession {
            session,
            epoch: inner.epoch,
        })
    }

    pub fn begin(&self) -> Begin {
        let mut guard = self.lock();
        let inner = &mut *guard;

        match &mut inner.phase {
            Phase::SignedIn { session } if !session.is_expired(self.expiry_skew) => Begin::Ready,
            Phase::Authenticating { waiters } => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                debug!("Sign-in already running, waiting for it ({} waiters)", waiters.len());
                Begin::Wait(rx)
            }
            _ => {
                let (tx, rx) = oneshot::channel();
                inner.epoch += 1;
                inner.phase = Phase::Authenticating { waiters: vec![tx] };
                Begin::Start {
                    epoch: inner.epoch,
                    outcome: rx,
                }
            }
        }
    }

    /// Record the outcome of the sign-in started at `epoch` and wake its waiters.
    pub fn finish(&self, epoch: u64, result: DirectoryResult<Session>) {
        let mut inner = self.lock();

        if inner.epoch != epoch || !matches!(inner.phase, Phase::Authenticating { .. }) {
            warn!("Discarding sign-in result overtaken by sign-out");
            return;
        }

        let (next, outcome) = match result {
            Ok(session) => (
                Phase::SignedIn {
                    session: Arc::new(session),
                },
                Ok(()),
            ),
            Err(e) => {
                warn!("Sign-in failed: {}", e);
                (Phase::SignedOut, Err(ManagerError::from(e)))
            }
        };

        if let Phase::Authenticating { waiters } = std::mem::replace(&mut inner.phase, next) {
            for waiter in waiters {
                let _ = waiter.send(outcome.clone());
            }
        }
    }

    /// Sign out. `also` runs while the state lock is held.
    pub fn clear_with(&self, also: impl FnOnce()) {
        let mut inner = self.lock();
        inner.epoch += 1;

        if let Phase::Authenticating { waiters } =
            std::mem::replace(&mut inner.phase, Phase::SignedOut)
        {
            for waiter in waiters {
                let _ = waiter.send(Err(ManagerError::AuthenticationFailed(
                    "sign-in cancelled by sign-out".to_string(),
                )));
            }
        }

        also();
    }

    /// True while `active` is the signed-in session and has not expired.
    pub fn still_current(&self, active: &ActiveSession) -> bool {
        let inner = self.lock();
        inner.epoch == active.epoch
            && matches!(
                &inner.phase,
                Phase::SignedIn { session } if Arc::ptr_eq(session, &active.session)
            )
            && !active.session.is_expired(self.expiry_skew)
    }

    /// Sign out if `active` is still the current session.
    ///
    /// Returns whether the state changed.
    pub fn invalidate(&self, active: &ActiveSession) -> bool {
        let mut inner = self.lock();

        let current = matches!(
            &inner.phase,
            Phase::SignedIn { session } if Arc::ptr_eq(session, &active.session)
        );
        if !current || inner.epoch != active.epoch {
            return false;
        }

        inner.epoch += 1;
        inner.phase = Phase::SignedOut;
        true
    }
}
