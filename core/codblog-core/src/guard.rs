//! Gate for protected views.

use tokio::sync::watch;

use crate::session::SessionState;

pub const LOGIN_NOTICE: &str = "Please login to access this page.";
pub const DEFAULT_ENTRY_POINT: &str = "/";

/// What a protected view should do right now.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    /// Session not decided yet. Show a neutral placeholder, don't navigate.
    Loading,
    Render,
    /// `notice` is only set the first time this guard redirects.
    Redirect { to: String, notice: Option<String> },
}

/// One guard per navigation attempt. The login notice is de-duplicated
/// across re-evaluations of the same guard.
pub struct RouteGuard {
    session: watch::Receiver<SessionState>,
    entry_point: String,
    notice_shown: bool,
}

impl RouteGuard {
    pub fn new(session: watch::Receiver<SessionState>) -> Self {
        Self::with_entry_point(session, DEFAULT_ENTRY_POINT)
    }

    pub fn with_entry_point(
        session: watch::Receiver<SessionState>,
        entry_point: impl Into<String>,
    ) -> Self {
        Self {
            session,
            entry_point: entry_point.into(),
            notice_shown: false,
        }
    }

    /// Decision for the current session state, without waiting.
    pub fn evaluate(&mut self) -> GuardDecision {
        let state = *self.session.borrow_and_update();
        self.decide(state)
    }

    /// Waits until the session is decided, then returns Render or Redirect.
    ///
    /// If the session manager goes away before deciding, the guard redirects.
    pub async fn resolve(&mut self) -> GuardDecision {
        loop {
            let decision = self.evaluate();
            if decision != GuardDecision::Loading {
                return decision;
            }
            if self.session.changed().await.is_err() {
                tracing::warn!("Session signal dropped before a decision; redirecting");
                return self.decide(SessionState::Unauthenticated);
            }
        }
    }

    fn decide(&mut self, state: SessionState) -> GuardDecision {
        match state {
            SessionState::Unknown | SessionState::Validating => GuardDecision::Loading,
            SessionState::Authenticated => GuardDecision::Render,
            SessionState::Unauthenticated => {
                let notice = if self.notice_shown {
                    None
                } else {
                    self.notice_shown = true;
                    Some(LOGIN_NOTICE.to_string())
                };
                GuardDecision::Redirect {
                    to: self.entry_point.clone(),
                    notice,
                }
            }
        }
    }
}
