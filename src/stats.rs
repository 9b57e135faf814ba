//! Per-user statistics aggregation for Elektra
//!
//! Folds completed sessions into rolling per-user totals with a monthly
//! breakdown. Guests share one synthetic "Guest" aggregate unless per-guest
//! breakdown is enabled; unattributed sessions accumulate under "Unknown".
//! Application is idempotent per session id so a re-delivered completion
//! event cannot double-count.

use crate::config::StatsConfig;
use crate::logging::get_logger;
use crate::session::CompletedSession;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, RwLock};

/// Stats key for guests when no per-guest breakdown is configured
pub const GUEST_AGGREGATE: &str = "Guest";

/// Stats key for unattributed sessions
pub const UNKNOWN_USER: &str = "Unknown";

// Bound on the re-delivery dedupe window
const RECENT_IDS_CAPACITY: usize = 256;

/// Monthly charging statistics bucket
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonthStats {
    /// Energy delivered this month (kWh)
    pub energy_kwh: f64,
    /// Cost accumulated this month
    pub cost_total: f64,
    /// Sessions completed this month
    pub sessions: u32,
}

/// Accumulated charging statistics for one stats key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserStats {
    /// User display name (or a synthetic aggregate name)
    pub user_name: String,
    /// Lifetime energy (kWh)
    pub total_energy_kwh: f64,
    /// Lifetime cost
    pub total_cost: f64,
    /// Lifetime session count
    pub session_count: u32,
    /// End timestamp of the most recent session
    pub last_session_at: Option<DateTime<Utc>>,
    /// Monthly buckets keyed by `YYYY-MM` of the session start
    pub months: BTreeMap<String, MonthStats>,
}

impl UserStats {
    fn new(user_name: &str) -> Self {
        Self {
            user_name: user_name.to_string(),
            ..Self::default()
        }
    }
}

/// Most recent guest session, retained until the next one
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuestLastSession {
    /// Energy delivered (kWh)
    pub energy_kwh: f64,
    /// What the guest pays, when guest pricing applied
    pub charge_price: Option<f64>,
    /// End timestamp
    pub session_at: DateTime<Utc>,
}

/// Folds completed sessions into per-user rolling totals
pub struct StatsAggregator {
    per_guest_breakdown: bool,
    users: HashMap<String, UserStats>,
    guest_last: Option<GuestLastSession>,
    recent_ids: VecDeque<String>,
    recent_set: HashSet<String>,
    logger: crate::logging::StructuredLogger,
}

impl StatsAggregator {
    /// Create an empty aggregator
    pub fn new(config: &StatsConfig) -> Self {
        Self {
            per_guest_breakdown: config.per_guest_breakdown,
            users: HashMap::new(),
            guest_last: None,
            recent_ids: VecDeque::with_capacity(RECENT_IDS_CAPACITY),
            recent_set: HashSet::with_capacity(RECENT_IDS_CAPACITY),
            logger: get_logger("stats"),
        }
    }

    /// Apply one completed session.
    ///
    /// Returns `false` when the session id was already applied; totals are
    /// left untouched in that case.
    pub fn apply(&mut self, completed: &CompletedSession) -> bool {
        if self.recent_set.contains(&completed.session_id) {
            self.logger.debug(&format!(
                "Duplicate completed session {}, ignoring",
                completed.session_id
            ));
            return false;
        }
        self.remember_id(completed.session_id.clone());

        let key = self.stats_key(completed);
        let stats = self
            .users
            .entry(key.clone())
            .or_insert_with(|| UserStats::new(&key));

        stats.total_energy_kwh = round3(stats.total_energy_kwh + completed.energy_kwh);
        stats.total_cost = round2(stats.total_cost + completed.cost_total);
        stats.session_count += 1;
        stats.last_session_at = Some(completed.ended_at);

        // Month bucket keyed by the session start time
        let month_key = completed.started_at.format("%Y-%m").to_string();
        let month = stats.months.entry(month_key).or_default();
        month.energy_kwh = round3(month.energy_kwh + completed.energy_kwh);
        month.cost_total = round2(month.cost_total + completed.cost_total);
        month.sessions += 1;

        if completed.is_guest() {
            self.guest_last = Some(GuestLastSession {
                energy_kwh: completed.energy_kwh,
                charge_price: completed.charge_price_total,
                session_at: completed.ended_at,
            });
        }

        self.logger.debug(&format!(
            "Stats updated for '{}': total={:.3} kWh, sessions={}",
            key, stats.total_energy_kwh, stats.session_count
        ));
        true
    }

    /// Statistics for one stats key
    pub fn user(&self, name: &str) -> Option<&UserStats> {
        self.users.get(name)
    }

    /// All per-user statistics
    pub fn users(&self) -> &HashMap<String, UserStats> {
        &self.users
    }

    /// Most recent guest session, if any
    pub fn guest_last(&self) -> Option<&GuestLastSession> {
        self.guest_last.as_ref()
    }

    fn stats_key(&self, completed: &CompletedSession) -> String {
        if completed.identity.user().is_none() {
            return UNKNOWN_USER.to_string();
        }
        if completed.is_guest() && !self.per_guest_breakdown {
            return GUEST_AGGREGATE.to_string();
        }
        completed.user_name().to_string()
    }

    fn remember_id(&mut self, id: String) {
        if self.recent_ids.len() >= RECENT_IDS_CAPACITY
            && let Some(oldest) = self.recent_ids.pop_front()
        {
            self.recent_set.remove(&oldest);
        }
        self.recent_set.insert(id.clone());
        self.recent_ids.push_back(id);
    }
}

/// Shared handle: the engine runtime writes, display/reporting paths read.
/// The lock scope covers one whole session application, so readers never
/// observe partially updated totals.
pub type SharedStats = Arc<RwLock<StatsAggregator>>;

/// Create a shared aggregator handle
pub fn shared(config: &StatsConfig) -> SharedStats {
    Arc::new(RwLock::new(StatsAggregator::new(config)))
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
