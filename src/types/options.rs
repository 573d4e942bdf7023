//! Agent link options and configuration
//!
//! This module contains the configuration for the connection managers,
//! including a builder pattern and loaders for environment variables and
//! JSON files.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use super::identifiers::{AgentId, SessionId, TaskId};
use crate::error::{LinkError, Result};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default primary endpoint base
pub const DEFAULT_BASE_URL: &str = "ws://127.0.0.1:8000";

/// Default delay before the first reconnect (1 second)
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Default backoff multiplier
pub const DEFAULT_MULTIPLIER: f64 = 2.0;

/// Default backoff cap (30 seconds)
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Default attempt cap for primary connections
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default upper bound of the random jitter (1 second)
pub const DEFAULT_JITTER_MS: u64 = 1_000;

/// Default silence before a liveness probe is sent (30 seconds)
pub const DEFAULT_LIVENESS_THRESHOLD_MS: u64 = 30_000;

/// Default health sweep period (15 seconds)
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 15_000;

/// Default settle delay before a transport is opened (100ms)
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 100;

/// Default bound on how long `send` waits for an opening connection (5 seconds)
pub const DEFAULT_SEND_TIMEOUT_MS: u64 = 5_000;

// ============================================================================
// Reconnect Policy
// ============================================================================

/// Backoff parameters shared by every connection of one manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectPolicy {
    /// Delay before the first reconnect
    pub base_delay_ms: u64,
    /// Growth factor per failed attempt
    pub multiplier: f64,
    /// Cap on the exponential part of the delay
    pub max_delay_ms: u64,
    /// Consecutive failures tolerated before giving up
    pub max_attempts: u32,
    /// Upper bound of the uniformly random jitter added to each delay
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            multiplier: DEFAULT_MULTIPLIER,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            jitter_ms: DEFAULT_JITTER_MS,
        }
    }
}

impl ReconnectPolicy {
    /// Policy without jitter; handy where delays must be exact
    #[must_use]
    pub fn without_jitter(mut self) -> Self {
        self.jitter_ms = 0;
        self
    }

    /// Maximum delay the policy can ever produce
    #[must_use]
    pub const fn ceiling(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms.saturating_add(self.jitter_ms))
    }

    /// Check the policy for values that would break the backoff maths
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` describing the first violation
    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(LinkError::invalid_config(format!(
                "backoff multiplier must be >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err(LinkError::invalid_config(format!(
                "base delay {}ms exceeds max delay {}ms",
                self.base_delay_ms, self.max_delay_ms
            )));
        }
        if self.max_attempts == 0 {
            return Err(LinkError::invalid_config("max attempts must be at least 1"));
        }
        Ok(())
    }
}

// ============================================================================
// Health Options
// ============================================================================

/// Liveness sweep parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HealthOptions {
    /// Silence after which a probe is sent
    pub liveness_threshold_ms: u64,
    /// Sweep period
    pub probe_interval_ms: u64,
}

impl Default for HealthOptions {
    fn default() -> Self {
        Self {
            liveness_threshold_ms: DEFAULT_LIVENESS_THRESHOLD_MS,
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
        }
    }
}

impl HealthOptions {
    /// Silence threshold as a `Duration`
    #[must_use]
    pub const fn liveness_threshold(&self) -> Duration {
        Duration::from_millis(self.liveness_threshold_ms)
    }

    /// Sweep period as a `Duration`
    #[must_use]
    pub const fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

// ============================================================================
// Endpoints
// ============================================================================

/// Upstream endpoint bases
///
/// Routes are built purely from path segments:
/// `{primary}/ws/{session}/{agent}`, `{signaling}/ws/a2a/{agent}` and
/// `{signaling}/ws/tasks/{task}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoints {
    /// Base of the per-(session, agent) primary endpoint
    pub primary: Url,
    /// Base of the signaling endpoints
    pub signaling: Url,
}

impl Default for Endpoints {
    fn default() -> Self {
        let base = Url::parse(DEFAULT_BASE_URL).unwrap_or_else(|_| unreachable!());
        Self {
            primary: base.clone(),
            signaling: base,
        }
    }
}

impl Endpoints {
    /// Use one base for both primary and signaling endpoints
    ///
    /// # Errors
    /// Returns error if `base` is not a valid URL
    pub fn from_base(base: &str) -> Result<Self> {
        let base = Url::parse(base)?;
        Ok(Self {
            primary: base.clone(),
            signaling: base,
        })
    }

    /// Primary endpoint for an agent within a session
    ///
    /// # Errors
    /// Returns error if the base URL cannot carry a path
    pub fn agent_url(&self, session_id: &SessionId, agent_id: &AgentId) -> Result<Url> {
        join_segments(
            &self.primary,
            &["ws", session_id.as_str(), agent_id.as_str()],
        )
    }

    /// Agent-to-agent signaling endpoint
    ///
    /// # Errors
    /// Returns error if the base URL cannot carry a path
    pub fn a2a_url(&self, agent_id: &AgentId) -> Result<Url> {
        join_segments(&self.signaling, &["ws", "a2a", agent_id.as_str()])
    }

    /// Task event subscription endpoint
    ///
    /// # Errors
    /// Returns error if the base URL cannot carry a path
    pub fn task_url(&self, task_id: &TaskId) -> Result<Url> {
        join_segments(&self.signaling, &["ws", "tasks", task_id.as_str()])
    }
}

fn join_segments(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|()| LinkError::invalid_config(format!("{base} cannot be used as a base URL")))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

// ============================================================================
// Link Options
// ============================================================================

/// Main options for the connection managers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkOptions {
    /// Upstream endpoints
    pub endpoints: Endpoints,
    /// Backoff for primary agent connections
    pub reconnect: ReconnectPolicy,
    /// Backoff shape for signaling channels (attempt cap ignored)
    pub signaling_reconnect: ReconnectPolicy,
    /// Liveness sweep
    pub health: HealthOptions,
    /// Delay between `connect()` and the transport open
    pub settle_delay_ms: u64,
    /// How long `send()` waits for an opening connection
    pub send_timeout_ms: u64,
}

impl Default for LinkOptions {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            reconnect: ReconnectPolicy::default(),
            signaling_reconnect: ReconnectPolicy::default(),
            health: HealthOptions::default(),
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            send_timeout_ms: DEFAULT_SEND_TIMEOUT_MS,
        }
    }
}

impl LinkOptions {
    /// Create a new builder for `LinkOptions`
    #[must_use]
    pub fn builder() -> LinkOptionsBuilder {
        LinkOptionsBuilder::default()
    }

    /// Settle delay as a `Duration`
    #[must_use]
    pub const fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Send timeout as a `Duration`
    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    /// Validate every nested section
    ///
    /// # Errors
    /// Returns `LinkError::InvalidConfig` for the first invalid value
    pub fn validate(&self) -> Result<()> {
        self.reconnect.validate()?;
        self.signaling_reconnect.validate()?;
        if self.health.probe_interval_ms == 0 {
            return Err(LinkError::invalid_config("probe interval must be non-zero"));
        }
        Ok(())
    }

    /// Load options from `AGENT_LINK_*` environment variables
    ///
    /// Unset variables keep their defaults.
    ///
    /// # Errors
    /// Returns error if a variable is set but malformed
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load options through an arbitrary key lookup
    ///
    /// Uses the same keys as [`LinkOptions::from_env`].
    ///
    /// # Errors
    /// Returns error if a value is present but malformed
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut options = Self::default();

        if let Some(base) = lookup("AGENT_LINK_BASE_URL") {
            options.endpoints = Endpoints::from_base(&base)?;
        }
        if let Some(signaling) = lookup("AGENT_LINK_SIGNALING_URL") {
            options.endpoints.signaling = Url::parse(&signaling)?;
        }

        let policy = &mut options.reconnect;
        read_var(&lookup, "AGENT_LINK_BACKOFF_BASE_MS", &mut policy.base_delay_ms)?;
        read_var(&lookup, "AGENT_LINK_BACKOFF_MULTIPLIER", &mut policy.multiplier)?;
        read_var(&lookup, "AGENT_LINK_BACKOFF_MAX_MS", &mut policy.max_delay_ms)?;
        read_var(&lookup, "AGENT_LINK_MAX_ATTEMPTS", &mut policy.max_attempts)?;
        read_var(&lookup, "AGENT_LINK_JITTER_MS", &mut policy.jitter_ms)?;
        options.signaling_reconnect = options.reconnect.clone();

        read_var(
            &lookup,
            "AGENT_LINK_LIVENESS_MS",
            &mut options.health.liveness_threshold_ms,
        )?;
        read_var(
            &lookup,
            "AGENT_LINK_PROBE_INTERVAL_MS",
            &mut options.health.probe_interval_ms,
        )?;
        read_var(&lookup, "AGENT_LINK_SEND_TIMEOUT_MS", &mut options.send_timeout_ms)?;
        read_var(&lookup, "AGENT_LINK_SETTLE_MS", &mut options.settle_delay_ms)?;

        options.validate()?;
        Ok(options)
    }

    /// Load options from a JSON file (camelCase keys, all optional)
    ///
    /// # Errors
    /// Returns error if the file cannot be read, parsed or validated
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            LinkError::invalid_config(format!("cannot read {}: {e}", path.display()))
        })?;
        let options: Self = serde_json::from_str(&raw)?;
        options.validate()?;
        Ok(options)
    }
}

fn read_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, slot: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    if let Some(raw) = lookup(key) {
        *slot = raw
            .trim()
            .parse()
            .map_err(|e| LinkError::invalid_config(format!("{key}={raw}: {e}")))?;
    }
    Ok(())
}

// ============================================================================
// Builder for LinkOptions
// ============================================================================

/// Builder for `LinkOptions`
#[derive(Debug, Default)]
pub struct LinkOptionsBuilder {
    options: LinkOptions,
}

impl LinkOptionsBuilder {
    /// Set endpoints
    #[must_use]
    pub fn endpoints(mut self, endpoints: Endpoints) -> Self {
        self.options.endpoints = endpoints;
        self
    }

    /// Set the primary reconnect policy
    #[must_use]
    pub fn reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.reconnect = policy;
        self
    }

    /// Set the signaling reconnect policy
    #[must_use]
    pub fn signaling_reconnect(mut self, policy: ReconnectPolicy) -> Self {
        self.options.signaling_reconnect = policy;
        self
    }

    /// Set health options
    #[must_use]
    pub const fn health(mut self, health: HealthOptions) -> Self {
        self.options.health = health;
        self
    }

    /// Set the settle delay
    #[must_use]
    pub const fn settle_delay(mut self, delay: Duration) -> Self {
        self.options.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Set the send timeout
    #[must_use]
    pub const fn send_timeout(mut self, timeout: Duration) -> Self {
        self.options.send_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Build the options
    #[must_use]
    pub fn build(self) -> LinkOptions {
        self.options
    }
}
