//! Probe lifecycle: verdicts, reports, and the setup/run/teardown driver.

use std::{collections::BTreeMap, fmt, time::Duration};

use async_trait::async_trait;
use mqwatch_core::BrokerRegistry;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ProbeError, Result};

/// Monitoring verdict a probe renders.
///
/// The numeric codes follow the monitoring plugin convention, so a binary
/// wrapping a probe can exit with `verdict.exit_code()` directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeVerdict {
    /// Everything the probe measured is healthy
    Ok,
    /// Degraded but not yet failing
    Warning,
    /// The monitored path is broken
    Critical,
    /// The probe could not produce a meaningful measurement
    Unknown,
}

impl ProbeVerdict {
    /// Process exit code for this verdict
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Ok => 0,
            Self::Warning => 1,
            Self::Critical => 2,
            Self::Unknown => 3,
        }
    }
}

impl fmt::Display for ProbeVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Ok => "OK",
            Self::Warning => "WARNING",
            Self::Critical => "CRITICAL",
            Self::Unknown => "UNKNOWN",
        };
        f.write_str(label)
    }
}

/// Outcome of one probe run: a verdict, a human-readable summary, and the
/// counters behind it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeReport {
    /// Rendered verdict
    pub verdict: ProbeVerdict,
    /// One-line human-readable outcome
    pub summary: String,
    /// Named counts backing the verdict (received, outstanding, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub counters: BTreeMap<String, u64>,
    /// Mean observed delivery delay, when the probe measured one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mean_delay_ms: Option<f64>,
}

impl ProbeReport {
    /// Create a report with no counters
    pub fn new(verdict: ProbeVerdict, summary: impl Into<String>) -> Self {
        Self { verdict, summary: summary.into(), counters: BTreeMap::new(), mean_delay_ms: None }
    }

    /// Attach one named counter
    #[must_use]
    pub fn with_counter(mut self, name: impl Into<String>, value: u64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    /// Attach the mean observed delivery delay
    #[must_use]
    pub fn with_mean_delay(mut self, delay: Duration) -> Self {
        self.mean_delay_ms = Some(delay.as_secs_f64() * 1000.0);
        self
    }
}

impl fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.verdict, self.summary)
    }
}

/// One broker a probe connects to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerTarget {
    /// Registry name for the broker
    pub name: String,
    /// Hostname the broker listens on
    pub host: String,
    /// Port the broker listens on
    pub port: u16,
}

impl BrokerTarget {
    /// Create a broker target
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self { name: name.into(), host: host.into(), port }
    }
}

/// A scenario driven against the engine that renders a monitoring verdict.
///
/// `setup` registers whatever brokers the probe needs; `run` drives the
/// scenario and reports. Probes are single-use state machines: drive them
/// through [`execute`], which guarantees teardown.
#[async_trait]
pub trait Probe: Send {
    /// Name used in logs and reports
    fn name(&self) -> &str;

    /// Register brokers and apply credentials.
    ///
    /// # Errors
    /// Returns an error when the probe's configuration cannot be applied.
    async fn setup(&mut self, registry: &mut BrokerRegistry) -> Result<()>;

    /// Drive the scenario.
    ///
    /// # Errors
    /// Returns an error when the engine fails underneath the scenario; an
    /// unhealthy-but-measurable outcome is a report, not an error.
    async fn run(&mut self, registry: &mut BrokerRegistry) -> Result<ProbeReport>;
}

/// Drive a probe through setup and run, then tear the registry down.
///
/// Teardown always happens, whether setup or run failed or not, so a probe
/// aborted halfway never leaks connections into the next scheduled run.
///
/// # Errors
/// Propagates the setup or run failure after teardown completes.
pub async fn execute(probe: &mut dyn Probe, registry: &mut BrokerRegistry) -> Result<ProbeReport> {
    info!(probe = probe.name(), "probe starting");
    let outcome = match probe.setup(registry).await {
        Ok(()) => probe.run(registry).await,
        Err(error) => Err(error),
    };
    registry.destroy_all_brokers().await;
    match &outcome {
        Ok(report) => {
            info!(probe = probe.name(), verdict = %report.verdict, summary = %report.summary, "probe finished");
        },
        Err(error) => warn!(probe = probe.name(), %error, "probe failed"),
    }
    outcome
}

/// Interpret a permissively-routed registry result: a probe addressing a
/// broker its own setup never registered is a configuration bug.
pub(crate) fn routed(done: bool, broker: &str) -> Result<()> {
    if done {
        Ok(())
    } else {
        Err(ProbeError::UnregisteredBroker(broker.to_owned()))
    }
}
