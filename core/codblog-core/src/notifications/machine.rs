//! Connection state machine for the notification channel.
//!
//! Pure: every input returns the side effects to perform as
//! [`ChannelCommand`]s and the async driver in `manager.rs` executes them.
//! Keeping the bookkeeping here makes the single-connection and
//! single-timer rules testable without sockets or timers.
//!
//! Each opened connection gets a fresh generation. Events tagged with an
//! older generation come from a connection that was already replaced or torn
//! down and are ignored.

use std::time::Duration;

use codblog_protocol::UserId;

use crate::backoff::ReconnectPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Never connected, or torn down.
    Idle,
    Connecting,
    Open,
    /// Closed by the transport; a reconnect timer is pending.
    Reconnecting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ChannelCommand {
    Open { user_id: UserId, generation: u64 },
    Close,
    ScheduleReconnect { delay: Duration, generation: u64 },
    CancelReconnect,
}

#[derive(Debug)]
pub(crate) struct ChannelMachine {
    phase: ConnectionPhase,
    user_id: Option<UserId>,
    generation: u64,
    reconnect_pending: bool,
    failures: u32,
    policy: ReconnectPolicy,
}

impl ChannelMachine {
    pub(crate) fn new(policy: ReconnectPolicy) -> Self {
        Self {
            phase: ConnectionPhase::Idle,
            user_id: None,
            generation: 0,
            reconnect_pending: false,
            failures: 0,
            policy,
        }
    }

    pub(crate) fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn reconnect_pending(&self) -> bool {
        self.reconnect_pending
    }

    pub(crate) fn user_id(&self) -> Option<UserId> {
        self.user_id
    }

    /// Opens a channel for `user_id`, replacing any existing one. No-op
    /// without a user.
    pub(crate) fn connect(&mut self, user_id: Option<UserId>) -> Vec<ChannelCommand> {
        let Some(user_id) = user_id else {
            return Vec::new();
        };

        let mut commands = Vec::new();
        if self.reconnect_pending {
            self.reconnect_pending = false;
            commands.push(ChannelCommand::CancelReconnect);
        }
        if matches!(
            self.phase,
            ConnectionPhase::Connecting | ConnectionPhase::Open
        ) {
            commands.push(ChannelCommand::Close);
        }

        self.user_id = Some(user_id);
        self.generation += 1;
        self.phase = ConnectionPhase::Connecting;
        commands.push(ChannelCommand::Open {
            user_id,
            generation: self.generation,
        });
        commands
    }

    /// Returns false when the open belongs to a replaced connection.
    pub(crate) fn opened(&mut self, generation: u64) -> bool {
        if generation != self.generation || self.phase != ConnectionPhase::Connecting {
            return false;
        }
        self.phase = ConnectionPhase::Open;
        self.failures = 0;
        true
    }

    /// Whether frames from `generation` should be processed.
    pub(crate) fn accepts(&self, generation: u64) -> bool {
        generation == self.generation && self.phase == ConnectionPhase::Open
    }

    /// Transport closed (or failed to open). Schedules a reconnect unless one
    /// is already pending.
    pub(crate) fn closed(&mut self, generation: u64) -> Vec<ChannelCommand> {
        if generation != self.generation || self.phase == ConnectionPhase::Idle {
            return Vec::new();
        }
        self.phase = ConnectionPhase::Reconnecting;
        if self.reconnect_pending {
            return Vec::new();
        }

        self.failures = self.failures.saturating_add(1);
        self.reconnect_pending = true;
        vec![ChannelCommand::ScheduleReconnect {
            delay: self.policy.delay_for(self.failures),
            generation: self.generation,
        }]
    }

    /// The reconnect timer scheduled for `generation` fired.
    pub(crate) fn reconnect_fired(&mut self, generation: u64) -> Vec<ChannelCommand> {
        if !self.reconnect_pending || generation != self.generation {
            return Vec::new();
        }
        self.reconnect_pending = false;
        self.connect(self.user_id)
    }

    /// Closes the connection and cancels the timer, whatever the phase.
    pub(crate) fn teardown(&mut self) -> Vec<ChannelCommand> {
        self.reconnect_pending = false;
        self.user_id = None;
        self.failures = 0;
        self.phase = ConnectionPhase::Idle;
        self.generation += 1;
        vec![ChannelCommand::CancelReconnect, ChannelCommand::Close]
    }
}
