//! Per-host politeness limits
//!
//! The HTTP backend asks its `Limiter` for a permit before every network
//! request and releases it once the response body has been read. The
//! collector itself applies no backpressure.

use crate::config::LimitRuleConfig;
use crate::url::matches_glob;
use crate::ConfigError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Capability deciding when a request to a host may go out
pub trait Limiter: Send + Sync {
    /// Waits until a request to `host` may start
    fn acquire<'a>(&'a self, host: &'a str) -> BoxFuture<'a, LimitPermit>;
}

/// Permission to send one request
///
/// Call `release` once the response has been consumed; the permit then
/// waits out the rule's delay before freeing its slot.
#[derive(Debug, Default)]
pub struct LimitPermit {
    _slot: Option<OwnedSemaphorePermit>,
    delay: Duration,
}

impl LimitPermit {
    /// A permit that imposes nothing
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub async fn release(self) {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
    }
}

/// One limit rule: a host glob with a concurrency cap and a delay
#[derive(Debug)]
pub struct LimitRule {
    domain_glob: String,
    slots: Arc<Semaphore>,
    parallelism: usize,
    delay: Duration,
}

impl LimitRule {
    /// Creates a rule; a parallelism of 0 is treated as 1
    pub fn new(domain_glob: impl Into<String>, parallelism: usize, delay: Duration) -> Self {
        let parallelism = parallelism.max(1);
        Self {
            domain_glob: domain_glob.into(),
            slots: Arc::new(Semaphore::new(parallelism)),
            parallelism,
            delay,
        }
    }

    pub fn from_config(config: &LimitRuleConfig) -> Result<Self, ConfigError> {
        if config.domain_glob.trim().is_empty() {
            return Err(ConfigError::Validation(
                "limit rule needs a domain-glob".to_string(),
            ));
        }
        Ok(Self::new(
            config.domain_glob.clone(),
            config.parallelism,
            Duration::from_millis(config.delay_ms),
        ))
    }

    pub fn matches(&self, host: &str) -> bool {
        matches_glob(&self.domain_glob, host)
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

/// `Limiter` applying the first matching rule
///
/// Slots are shared by every host the rule matches.
#[derive(Debug, Default)]
pub struct RuleLimiter {
    rules: Vec<LimitRule>,
}

impl RuleLimiter {
    pub fn new(rules: Vec<LimitRule>) -> Self {
        Self { rules }
    }

    pub fn from_config(configs: &[LimitRuleConfig]) -> Result<Self, ConfigError> {
        let rules = configs
            .iter()
            .map(LimitRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(rules))
    }

    /// Returns the rule applying to `host`, if any
    pub fn matching_rule(&self, host: &str) -> Option<&LimitRule> {
        self.rules.iter().find(|r| r.matches(host))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl Limiter for RuleLimiter {
    fn acquire<'a>(&'a self, host: &'a str) -> BoxFuture<'a, LimitPermit> {
        async move {
            let rule = match self.matching_rule(host) {
                Some(rule) => rule,
                None => return LimitPermit::unlimited(),
            };

            // The semaphore is never closed
            let slot = Arc::clone(&rule.slots).acquire_owned().await.ok();
            LimitPermit {
                _slot: slot,
                delay: rule.delay,
            }
        }
        .boxed()
    }
}
