// src/blocklist.rs
//! Shared suspicious-number store keyed by normalized phone identifier.
//! Report = upsert (increment if present, else create with count 1).

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use tokio::fs;
use tracing::{info, warn};

/// Keep digits only, preserving a leading `+`. `None` if no digits remain.
pub fn normalize_phone(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    if trimmed.starts_with('+') {
        Some(format!("+{digits}"))
    } else {
        Some(digits)
    }
}

/// Short, non-reversible id for logs (first 6 bytes of SHA-256, hex).
pub fn anon_id(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    let mut out = String::with_capacity(12);
    for b in digest.iter().take(6) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NumberRecord {
    pub phone_number: String,
    pub report_count: u32,
    pub first_reported_at: DateTime<Utc>,
    pub last_reported_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspiciousLookup {
    pub found: bool,
    pub report_count: u32,
}

#[async_trait::async_trait]
pub trait SuspiciousNumberStore: Send + Sync {
    /// Upsert a report; returns the new report count.
    async fn report(&self, phone: &str) -> Result<u32>;
    async fn check(&self, phone: &str) -> Result<SuspiciousLookup>;
}

/// In-process store, optionally persisted as a JSON snapshot after each report.
#[derive(Debug, Default)]
pub struct Blocklist {
    records: Mutex<HashMap<String, NumberRecord>>,
    path: Option<PathBuf>,
    /// Held across snapshot + write so files land in report order.
    write_lock: tokio::sync::Mutex<()>,
}

impl Blocklist {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load a snapshot from `path` (missing or unreadable file => empty) and
    /// keep writing to it.
    pub async fn with_persistence(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let records = match fs::read_to_string(&path).await {
            Ok(s) => serde_json::from_str::<Vec<NumberRecord>>(&s)
                .map(|v| {
                    v.into_iter()
                        .map(|r| (r.phone_number.clone(), r))
                        .collect::<HashMap<_, _>>()
                })
                .unwrap_or_else(|e| {
                    warn!(target: "blocklist", "snapshot parse failed: {e}");
                    HashMap::new()
                }),
            Err(_) => HashMap::new(),
        };
        Self {
            records: Mutex::new(records),
            path: Some(path),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn records(&self) -> Vec<NumberRecord> {
        let g = self.records.lock().unwrap_or_else(|p| p.into_inner());
        let mut v: Vec<NumberRecord> = g.values().cloned().collect();
        v.sort_by(|a, b| a.phone_number.cmp(&b.phone_number));
        v
    }

    async fn persist(&self) {
        let Some(path) = &self.path else {
            return;
        };
        let _writing = self.write_lock.lock().await;
        let snapshot = self.records();
        if let Some(dir) = path.parent() {
            if let Err(e) = fs::create_dir_all(dir).await {
                warn!(target: "blocklist", "snapshot dir: {e:#}");
            }
        }
        let body = serde_json::to_vec_pretty(&snapshot).unwrap_or_default();
        if let Err(e) = fs::write(path, body).await {
            warn!(target: "blocklist", "write snapshot: {e:#}");
        }
    }
}

#[async_trait::async_trait]
impl SuspiciousNumberStore for Blocklist {
    async fn report(&self, phone: &str) -> Result<u32> {
        let Some(key) = normalize_phone(phone) else {
            bail!("not a phone number");
        };
        let now = Utc::now();
        let count = {
            let mut g = self.records.lock().unwrap_or_else(|p| p.into_inner());
            let rec = g.entry(key.clone()).or_insert_with(|| NumberRecord {
                phone_number: key.clone(),
                report_count: 0,
                first_reported_at: now,
                last_reported_at: now,
            });
            rec.report_count = rec.report_count.saturating_add(1);
            rec.last_reported_at = now;
            rec.report_count
        };
        metrics::counter!("guard_numbers_reported_total").increment(1);
        info!(target: "blocklist", id = %anon_id(&key), report_count = count, "suspicious number reported");
        self.persist().await;
        Ok(count)
    }

    async fn check(&self, phone: &str) -> Result<SuspiciousLookup> {
        let Some(key) = normalize_phone(phone) else {
            bail!("not a phone number");
        };
        let g = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(match g.get(&key) {
            Some(r) => SuspiciousLookup {
                found: true,
                report_count: r.report_count,
            },
            None => SuspiciousLookup {
                found: false,
                report_count: 0,
            },
        })
    }
}
