//! Reconnect automaton for the terminal socket
//!
//! The machine never touches a socket or a clock. It consumes [`Event`]s and
//! answers with [`Effect`]s for the driver to execute, so the whole backoff and
//! stability policy runs (and is tested) without a browser.

use std::time::Duration;

use crate::connection::{ConnectionState, LinkState};
use crate::endpoint::TerminalEndpoint;

/// Backoff and stability tuning
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_attempts: u32,
    /// How long a connection must stay open before backoff is reset
    pub stability_window: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_attempts: 5,
            stability_window: Duration::from_millis(5000),
        }
    }
}

impl ReconnectPolicy {
    /// Delay before retry `attempt` (1-based): `base * 2^(attempt-1)`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

/// Unique per machine; a timer id is never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerKind {
    Stability,
    Retry,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Manual connect
    Connect,
    /// Manual disconnect
    Disconnect,
    /// Socket opened
    Opened,
    /// Socket closed or failed to open
    Closed,
    TimerFired(TimerId),
    /// A frame was sent or received at this time (ms since the epoch)
    Activity(u64),
    /// The server announced the session this socket is attached to
    SessionAssigned { id: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Open { url: String },
    Close,
    StartTimer {
        id: TimerId,
        kind: TimerKind,
        delay: Duration,
    },
    CancelTimer(TimerId),
}

#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    endpoint: TerminalEndpoint,
    state: LinkState,
    attempts: u32,
    session_id: Option<String>,
    session_name: Option<String>,
    error: Option<String>,
    last_activity: Option<u64>,
    next_timer: u64,
    stability: Option<TimerId>,
    retry: Option<TimerId>,
}

impl ReconnectMachine {
    pub fn new(endpoint: TerminalEndpoint, policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            endpoint,
            state: LinkState::Idle,
            attempts: 0,
            session_id: None,
            session_name: None,
            error: None,
            last_activity: None,
            next_timer: 1,
            stability: None,
            retry: None,
        }
    }

    pub fn link_state(&self) -> LinkState {
        self.state
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Session to reattach to on the next open
    pub fn set_session_id(&mut self, session_id: Option<String>) {
        self.session_id = session_id;
    }

    pub fn set_session_name(&mut self, name: Option<String>) {
        self.session_name = name;
    }

    pub fn snapshot(&self) -> ConnectionState {
        ConnectionState {
            connected: self.state == LinkState::Connected,
            connecting: matches!(self.state, LinkState::Connecting | LinkState::Reconnecting),
            session_id: self.session_id.clone(),
            session_name: self.session_name.clone(),
            error: self.error.clone(),
            reconnect_attempts: self.attempts,
            last_activity: self.last_activity,
            status: self.state,
        }
    }

    pub fn transition(&mut self, event: Event) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            Event::Connect => match self.state {
                LinkState::Connecting | LinkState::Connected => {}
                LinkState::Reconnecting => {
                    self.cancel_retry(&mut effects);
                    self.open(&mut effects);
                }
                LinkState::Idle | LinkState::Failed => {
                    self.error = None;
                    self.open(&mut effects);
                }
            },
            Event::Disconnect => {
                self.cancel_retry(&mut effects);
                self.cancel_stability(&mut effects);
                if matches!(self.state, LinkState::Connecting | LinkState::Connected) {
                    effects.push(Effect::Close);
                }
                self.state = LinkState::Idle;
                self.attempts = 0;
                self.error = None;
            }
            Event::Opened => {
                if self.state == LinkState::Connecting {
                    self.state = LinkState::Connected;
                    self.error = None;
                    let id = self.allocate_timer();
                    self.stability = Some(id);
                    effects.push(Effect::StartTimer {
                        id,
                        kind: TimerKind::Stability,
                        delay: self.policy.stability_window,
                    });
                }
            }
            Event::Closed => {
                if matches!(self.state, LinkState::Connecting | LinkState::Connected) {
                    self.cancel_stability(&mut effects);
                    if self.attempts < self.policy.max_attempts {
                        self.attempts += 1;
                        self.state = LinkState::Reconnecting;
                        self.error = Some("Connection lost, reconnecting".to_string());
                        let id = self.allocate_timer();
                        self.retry = Some(id);
                        effects.push(Effect::StartTimer {
                            id,
                            kind: TimerKind::Retry,
                            delay: self.policy.delay_for(self.attempts),
                        });
                    } else {
                        self.state = LinkState::Failed;
                        self.error = Some(format!(
                            "Connection failed after {} reconnect attempts",
                            self.attempts
                        ));
                    }
                }
            }
            Event::TimerFired(id) => {
                if self.stability == Some(id) && self.state == LinkState::Connected {
                    self.stability = None;
                    self.attempts = 0;
                } else if self.retry == Some(id) && self.state == LinkState::Reconnecting {
                    self.retry = None;
                    self.open(&mut effects);
                }
            }
            Event::Activity(at) => self.last_activity = Some(at),
            Event::SessionAssigned { id } => self.session_id = Some(id),
        }

        effects
    }

    fn open(&mut self, effects: &mut Vec<Effect>) {
        self.state = LinkState::Connecting;
        effects.push(Effect::Open {
            url: self.endpoint.url(self.session_id.as_deref()),
        });
    }

    fn allocate_timer(&mut self) -> TimerId {
        let id = TimerId(self.next_timer);
        self.next_timer += 1;
        id
    }

    fn cancel_retry(&mut self, effects: &mut Vec<Effect>) {
        if let Some(id) = self.retry.take() {
            effects.push(Effect::CancelTimer(id));
        }
    }

    fn cancel_stability(&mut self, effects: &mut Vec<Effect>) {
        if let Some(id) = self.stability.take() {
            effects.push(Effect::CancelTimer(id));
        }
    }
}
