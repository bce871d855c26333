//! # Sentinel Memory
//!
//! Persists every completed execution keyed by actor and derives the
//! behavioral signals the decision engine consumes: trust score, common
//! tools, and pattern flags. The signals are inputs to the engine, never
//! decisions themselves.
//!
//! Trust formula: `trust_score = 0.7 · approval_rate + 0.3 · low_risk_rate`.
//! Actors with no recorded history score a neutral 0.5.

#![forbid(unsafe_code)]

use chrono::{DateTime, Duration, Utc};
use parking_lot::{Mutex, RwLock};
use sentinel_core::{ActorId, PatternFlags, Result, RiskBand, SentinelError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

/// One completed execution attributed to an actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Actor the execution is attributed to.
    pub actor: ActorId,
    /// Tool that was invoked.
    pub tool: String,
    /// Risk band the execution carried.
    pub risk: RiskBand,
    /// Whether the execution was approved.
    pub approved: bool,
    /// Completion time.
    pub at: DateTime<Utc>,
}

/// Counts per risk band across an actor's full history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskDistribution {
    /// Low-risk executions.
    pub low: u64,
    /// Medium-risk executions.
    pub medium: u64,
    /// High-risk executions.
    pub high: u64,
}

/// Derived risk profile for one actor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskProfile {
    /// Total recorded executions.
    pub total_executions: u64,
    /// Fraction of executions that were approved.
    pub approval_rate: f64,
    /// Executions per risk band.
    pub risk_distribution: RiskDistribution,
    /// Tools the actor uses routinely, most-used first.
    pub common_tools: Vec<String>,
    /// Trust score in `[0, 1]`.
    pub trust_score: f64,
}

/// Profiler thresholds.
#[derive(Debug, Clone)]
pub struct ProfilerConfig {
    /// Recent window the pattern flags are computed over.
    pub window: Duration,
    /// Requests per minute above which `rapid_requests` fires.
    pub rapid_requests_per_minute: u64,
    /// High-risk attempts in the window above which `many_high_risk` fires.
    pub high_risk_threshold: u64,
    /// Uses after which a tool counts as common for the actor.
    pub common_tool_min_uses: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            window: Duration::minutes(10),
            rapid_requests_per_minute: 10,
            high_risk_threshold: 3,
            common_tool_min_uses: 3,
        }
    }
}

/// Actor-keyed execution history with optional JSONL persistence.
pub struct MemoryStore {
    config: ProfilerConfig,
    file: Option<Mutex<File>>,
    records: RwLock<HashMap<String, Vec<ExecutionRecord>>>,
}

impl MemoryStore {
    /// Volatile store, for tests and development.
    pub fn in_memory(config: ProfilerConfig) -> Self {
        Self {
            config,
            file: None,
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Open or create a persistent store at `path`, loading prior records.
    pub fn open(path: impl AsRef<Path>, config: ProfilerConfig) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut records: HashMap<String, Vec<ExecutionRecord>> = HashMap::new();
        if path.exists() {
            let reader = BufReader::new(File::open(path)?);
            for (idx, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let record: ExecutionRecord = serde_json::from_str(&line).map_err(|e| {
                    SentinelError::storage(format!("history line {} unparseable: {e}", idx + 1))
                })?;
                records
                    .entry(record.actor.as_str().to_string())
                    .or_default()
                    .push(record);
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            config,
            file: Some(Mutex::new(file)),
            records: RwLock::new(records),
        })
    }

    /// Record a completed execution.
    pub fn record(&self, record: ExecutionRecord) -> Result<()> {
        if let Some(file) = &self.file {
            let mut file = file.lock();
            let line = serde_json::to_string(&record)?;
            file.write_all(line.as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        self.records
            .write()
            .entry(record.actor.as_str().to_string())
            .or_default()
            .push(record);
        Ok(())
    }

    /// The actor's executions within `window` of `now`, oldest first.
    pub fn user_history(
        &self,
        actor: &ActorId,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Vec<ExecutionRecord> {
        let cutoff = now - window;
        self.records
            .read()
            .get(actor.as_str())
            .map(|records| {
                records
                    .iter()
                    .filter(|r| r.at > cutoff && r.at <= now)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Full-history risk profile for an actor.
    pub fn risk_profile(&self, actor: &ActorId) -> RiskProfile {
        let records = self.records.read();
        let history = records.get(actor.as_str()).map(Vec::as_slice).unwrap_or(&[]);
        if history.is_empty() {
            return RiskProfile {
                total_executions: 0,
                approval_rate: 0.0,
                risk_distribution: RiskDistribution::default(),
                common_tools: Vec::new(),
                trust_score: 0.5,
            };
        }

        let total = history.len() as u64;
        let approved = history.iter().filter(|r| r.approved).count() as u64;
        let mut distribution = RiskDistribution::default();
        let mut tool_counts: HashMap<&str, u64> = HashMap::new();
        for record in history {
            match record.risk {
                RiskBand::Low => distribution.low += 1,
                RiskBand::Medium => distribution.medium += 1,
                RiskBand::High => distribution.high += 1,
            }
            *tool_counts.entry(record.tool.as_str()).or_default() += 1;
        }

        let approval_rate = approved as f64 / total as f64;
        let low_risk_rate = distribution.low as f64 / total as f64;
        let trust_score = 0.7 * approval_rate + 0.3 * low_risk_rate;

        // Most-used first; ties break on name so the ordering is stable
        // under canonical serialization.
        let mut common: Vec<(String, u64)> = tool_counts
            .into_iter()
            .filter(|(_, count)| *count >= self.config.common_tool_min_uses)
            .map(|(tool, count)| (tool.to_string(), count))
            .collect();
        common.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        RiskProfile {
            total_executions: total,
            approval_rate,
            risk_distribution: distribution,
            common_tools: common.into_iter().map(|(tool, _)| tool).collect(),
            trust_score,
        }
    }

    /// Pattern flags over the actor's recent window.
    pub fn pattern_flags(&self, actor: &ActorId, now: DateTime<Utc>) -> PatternFlags {
        let recent = self.user_history(actor, self.config.window, now);
        let last_minute = recent
            .iter()
            .filter(|r| r.at > now - Duration::minutes(1))
            .count() as u64;
        let rapid_requests = last_minute > self.config.rapid_requests_per_minute;

        let rejections = recent.iter().filter(|r| !r.approved).count();
        let high_rejection_rate = !recent.is_empty() && rejections * 2 > recent.len();

        let high_risk = recent.iter().filter(|r| r.risk == RiskBand::High).count() as u64;
        let many_high_risk = high_risk > self.config.high_risk_threshold;

        PatternFlags {
            rapid_requests,
            high_rejection_rate,
            many_high_risk,
            suspicious: rapid_requests || high_rejection_rate || many_high_risk,
        }
    }

    /// The profiler's recent-window width.
    pub fn window(&self) -> Duration {
        self.config.window
    }
}
