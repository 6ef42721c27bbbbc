//! Controller configuration.
//!
//! All settings come from environment variables:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `WATCH_NAMESPACE` | all namespaces | Namespace whose ResourceGroups are reconciled |
//! | `EVENT_QUEUE_CAPACITY` | `1` | Slots in the event queue before watch tasks block |
//! | `ENQUEUE_TIMEOUT_SECS` | unbounded | Give up on an enqueue after this many seconds |
//! | `BACKOFF_MIN_SECS` | `1` | First discovery retry delay |
//! | `BACKOFF_MAX_SECS` | `60` | Largest discovery retry delay |

use crate::error::ControllerError;
use std::time::Duration;

/// Default number of queued events before producers block
pub const DEFAULT_QUEUE_CAPACITY: usize = 1;

/// Runtime settings of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    /// Namespace to reconcile ResourceGroups in, `None` for all namespaces
    pub namespace: Option<String>,
    /// Capacity of the bounded event queue
    pub queue_capacity: usize,
    /// Optional bound on how long one enqueue may block
    pub enqueue_timeout: Option<Duration>,
    /// First discovery retry delay in seconds
    pub backoff_min_secs: u64,
    /// Cap on the discovery retry delay in seconds
    pub backoff_max_secs: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            namespace: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: None,
            backoff_min_secs: 1,
            backoff_max_secs: 60,
        }
    }
}

impl ControllerConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ControllerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`, which maps a variable name to its value
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ControllerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let namespace = lookup("WATCH_NAMESPACE").filter(|ns| !ns.trim().is_empty());

        let queue_capacity = parse_var(&lookup, "EVENT_QUEUE_CAPACITY")?
            .unwrap_or(defaults.queue_capacity);
        if queue_capacity == 0 {
            return Err(ControllerError::InvalidConfig(
                "EVENT_QUEUE_CAPACITY must be at least 1".to_string(),
            ));
        }

        let enqueue_timeout = parse_var::<u64, _>(&lookup, "ENQUEUE_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs);

        let backoff_min_secs = parse_var(&lookup, "BACKOFF_MIN_SECS")?
            .unwrap_or(defaults.backoff_min_secs);
        let backoff_max_secs = parse_var(&lookup, "BACKOFF_MAX_SECS")?
            .unwrap_or(defaults.backoff_max_secs);
        if backoff_max_secs < backoff_min_secs {
            return Err(ControllerError::InvalidConfig(format!(
                "BACKOFF_MAX_SECS ({backoff_max_secs}) is less than BACKOFF_MIN_SECS ({backoff_min_secs})"
            )));
        }

        Ok(Self {
            namespace,
            queue_capacity,
            enqueue_timeout,
            backoff_min_secs,
            backoff_max_secs,
        })
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ControllerError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            ControllerError::InvalidConfig(format!("{key}={raw:?} is not valid: {e}"))
        }),
    }
}
