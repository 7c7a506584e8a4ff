//! Credit signals and the credit state log
//!
//! Signals are one-shot notifications derived from ledger state. Each one
//! emitted is also appended to the account's state log.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Credit state of an account, as last signalled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CreditState {
    Available,
    ThresholdReached,
    Used,
    Expiring,
    Expired,
}

impl fmt::Display for CreditState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CreditState::Available => write!(f, "AVAILABLE"),
            CreditState::ThresholdReached => write!(f, "THRESHOLD_REACHED"),
            CreditState::Used => write!(f, "USED"),
            CreditState::Expiring => write!(f, "EXPIRING"),
            CreditState::Expired => write!(f, "EXPIRED"),
        }
    }
}

impl CreditState {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "available" => Some(CreditState::Available),
            "threshold_reached" => Some(CreditState::ThresholdReached),
            "used" => Some(CreditState::Used),
            "expiring" => Some(CreditState::Expiring),
            "expired" => Some(CreditState::Expired),
            _ => None,
        }
    }

    /// Event name published for this state
    pub fn event_name(&self) -> &'static str {
        match self {
            CreditState::Available => "CREDITS_AVAILABLE",
            CreditState::ThresholdReached => "CREDITS_THRESHOLD_REACHED",
            CreditState::Used => "CREDITS_USED",
            CreditState::Expiring => "CREDITS_EXPIRING",
            CreditState::Expired => "CREDIT_EXPIRED",
        }
    }

    /// Event subtype, also used as the publish subject
    pub fn event_sub_type(&self) -> &'static str {
        self.event_name()
    }

    /// Human readable message
    pub fn message(&self) -> &'static str {
        match self {
            CreditState::Available => "cloud credits available",
            CreditState::ThresholdReached => "cloud credits threshold reached",
            CreditState::Used => "cloud credits used",
            CreditState::Expiring => "cloud credits about to expire",
            CreditState::Expired => "cloud credits expired",
        }
    }
}

/// One entry of the credit state log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditStateEntry {
    pub account_id: String,
    pub state: CreditState,
    /// When the state was signalled
    pub event_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CreditStateEntry {
    pub fn new(account_id: impl Into<String>, state: CreditState, event_at: DateTime<Utc>) -> Self {
        Self {
            account_id: account_id.into(),
            state,
            event_at,
            updated_at: Utc::now(),
        }
    }

    /// Same state, signalled at or after `since`
    pub fn is_recent(&self, state: CreditState, since: DateTime<Utc>) -> bool {
        self.state == state && self.event_at >= since
    }
}

/// Event severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventSeverity {
    #[default]
    Low,
    Medium,
    High,
}

/// Notification published for a credit signal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditEvent {
    pub account_id: String,
    pub event_name: String,
    pub event_sub_type: String,
    pub message: String,
    pub severity: EventSeverity,
    pub service_name: String,
    pub user_id: Uuid,
    pub client_record_id: Uuid,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl CreditEvent {
    /// Build the event for a credit state
    pub fn for_state(account_id: impl Into<String>, state: CreditState) -> Self {
        Self {
            account_id: account_id.into(),
            event_name: state.event_name().to_string(),
            event_sub_type: state.event_sub_type().to_string(),
            message: state.message().to_string(),
            severity: EventSeverity::Low,
            service_name: "CREDIT".to_string(),
            user_id: Uuid::new_v4(),
            client_record_id: Uuid::new_v4(),
            properties: HashMap::new(),
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}
