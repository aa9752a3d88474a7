//! Credential hand-off between a running test and a human operator.
//!
//! A test asks for a value (an OTP code, say), the operator supplies it from
//! the dashboard, and the test polls until it can consume it. At most one
//! request is outstanding at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Error, Result};

#[derive(Clone, PartialEq, Eq)]
enum Slot {
    Idle,
    Awaiting {
        kind: String,
        requested_at: DateTime<Utc>,
    },
    Fulfilled {
        kind: String,
        requested_at: DateTime<Utc>,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelayPhase {
    Idle,
    Awaiting,
    Fulfilled,
}

/// Public view of the relay. Never carries the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelayView {
    pub phase: RelayPhase,
    pub kind: Option<String>,
    pub requested_at: Option<DateTime<Utc>>,
}

pub struct AuthRelay {
    slot: Slot,
}

impl Default for AuthRelay {
    fn default() -> Self {
        Self { slot: Slot::Idle }
    }
}

impl fmt::Debug for AuthRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthRelay").field("view", &self.view()).finish()
    }
}

impl AuthRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn view(&self) -> RelayView {
        match &self.slot {
            Slot::Idle => RelayView {
                phase: RelayPhase::Idle,
                kind: None,
                requested_at: None,
            },
            Slot::Awaiting { kind, requested_at } => RelayView {
                phase: RelayPhase::Awaiting,
                kind: Some(kind.clone()),
                requested_at: Some(*requested_at),
            },
            Slot::Fulfilled {
                kind, requested_at, ..
            } => RelayView {
                phase: RelayPhase::Fulfilled,
                kind: Some(kind.clone()),
                requested_at: Some(*requested_at),
            },
        }
    }

    /// Open a request for a value of `kind`.
    pub fn request(&mut self, kind: &str) -> Result<RelayView> {
        let kind = kind.trim();
        if kind.is_empty() {
            return Err(Error::InvalidInput("Credential kind is required.".to_string()));
        }
        if self.slot != Slot::Idle {
            return Err(Error::Conflict(
                "A credential request is already pending.".to_string(),
            ));
        }

        self.slot = Slot::Awaiting {
            kind: kind.to_string(),
            requested_at: Utc::now(),
        };
        Ok(self.view())
    }

    /// Supply the value for the pending request.
    pub fn fulfill(&mut self, value: &str) -> Result<RelayView> {
        let value = value.trim();
        if value.is_empty() {
            return Err(Error::InvalidInput("Credential value is required.".to_string()));
        }

        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Awaiting { kind, requested_at } => {
                self.slot = Slot::Fulfilled {
                    kind,
                    requested_at,
                    value: value.to_string(),
                };
                Ok(self.view())
            }
            other => {
                self.slot = other;
                Err(Error::Conflict(
                    "No credential request is awaiting a value.".to_string(),
                ))
            }
        }
    }

    /// Take the supplied value, returning the relay to idle.
    pub fn consume(&mut self) -> Result<(String, String)> {
        match std::mem::replace(&mut self.slot, Slot::Idle) {
            Slot::Fulfilled { kind, value, .. } => Ok((kind, value)),
            other => {
                self.slot = other;
                Err(Error::Conflict("No credential value is available yet.".to_string()))
            }
        }
    }

    pub fn cancel(&mut self) {
        self.slot = Slot::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_fulfill_consume() {
        let mut relay = AuthRelay::new();
        assert_eq!(relay.view().phase, RelayPhase::Idle);

        let view = relay.request("otp").unwrap();
        assert_eq!(view.phase, RelayPhase::Awaiting);
        assert_eq!(view.kind.as_deref(), Some("otp"));

        assert!(matches!(relay.consume(), Err(Error::Conflict(_))));
        assert_eq!(relay.view().phase, RelayPhase::Awaiting);

        relay.fulfill(" 123456 ").unwrap();
        assert_eq!(relay.view().phase, RelayPhase::Fulfilled);

        let (kind, value) = relay.consume().unwrap();
        assert_eq!(kind, "otp");
        assert_eq!(value, "123456");
        assert_eq!(relay.view().phase, RelayPhase::Idle);
        assert!(relay.consume().is_err());
    }

    #[test]
    fn test_single_pending_request() {
        let mut relay = AuthRelay::new();
        relay.request("otp").unwrap();
        assert!(matches!(relay.request("password"), Err(Error::Conflict(_))));
        assert_eq!(relay.view().kind.as_deref(), Some("otp"));

        relay.cancel();
        relay.request("password").unwrap();
    }

    #[test]
    fn test_fulfill_requires_pending_request() {
        let mut relay = AuthRelay::new();
        assert!(matches!(relay.fulfill("x"), Err(Error::Conflict(_))));
        relay.request("otp").unwrap();
        assert!(matches!(relay.fulfill("  "), Err(Error::InvalidInput(_))));
        relay.fulfill("1").unwrap();
        assert!(matches!(relay.fulfill("2"), Err(Error::Conflict(_))));
    }

    #[test]
    fn test_debug_and_view_hide_value() {
        let mut relay = AuthRelay::new();
        relay.request("otp").unwrap();
        relay.fulfill("s3cret").unwrap();

        assert!(!format!("{relay:?}").contains("s3cret"));
        let json = serde_json::to_string(&relay.view()).unwrap();
        assert!(!json.contains("s3cret"));
        assert!(json.contains("\"phase\":\"fulfilled\""));
    }
}
