//! Environmental points and leaderboard
//!
//! Points per report:
//! - 10 base points for any report
//! - +5 when an admin marked it verified
//! - +15 when it is resolved
//! - +50 when it was a clean-up event
//!
//! The leaderboard sums points per user, sorts descending and assigns dense
//! ranks (equal totals share a rank).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::ScoringConfig;
use crate::models::{Profile, Report, ReportStatus};

/// Points needed per tier step
pub const TIER_STEP: u32 = 100;

const TIERS: [&str; 3] = ["Environmental Guardian", "Eco Warrior", "Planet Protector"];

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: Uuid,
    pub username: String,
    pub full_name: String,
    pub avatar_url: Option<String>,
    pub points: u32,
    pub reports: u32,
}

/// Per-user dashboard numbers
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct UserStats {
    pub total_reports: u32,
    pub pending: u32,
    pub in_progress: u32,
    pub resolved: u32,
    pub rejected: u32,
    pub points: u32,
    pub tier: String,
    pub next_tier: Option<String>,
    pub points_to_next_tier: u32,
}

pub fn report_points(report: &Report, scoring: &ScoringConfig) -> u32 {
    let mut points = scoring.base_points;
    if report.verified {
        points += scoring.verified_bonus;
    }
    if report.status == ReportStatus::Resolved {
        points += scoring.resolved_bonus;
    }
    if report.clean_up {
        points += scoring.clean_up_bonus;
    }
    points
}

pub fn user_points<'a>(
    reports: impl IntoIterator<Item = &'a Report>,
    scoring: &ScoringConfig,
) -> u32 {
    reports
        .into_iter()
        .map(|r| report_points(r, scoring))
        .sum()
}

/// Build the top-`limit` leaderboard from every profile and report.
///
/// Profiles without reports take part in ranking with zero points but are
/// dropped before slicing, as are reports with no owner.
pub fn build_leaderboard(
    profiles: &[Profile],
    reports: &[Report],
    scoring: &ScoringConfig,
    limit: usize,
) -> Vec<LeaderboardEntry> {
    let mut per_user: HashMap<Uuid, (u32, u32)> = HashMap::new();
    for report in reports {
        if let Some(user_id) = report.user_id {
            let slot = per_user.entry(user_id).or_default();
            slot.0 += report_points(report, scoring);
            slot.1 += 1;
        }
    }

    let mut entries: Vec<LeaderboardEntry> = profiles
        .iter()
        .map(|p| {
            let (points, count) = per_user.get(&p.id).copied().unwrap_or_default();
            LeaderboardEntry {
                rank: 0,
                user_id: p.id,
                username: p.username.clone().unwrap_or_else(|| "Anonymous".to_string()),
                full_name: p
                    .full_name
                    .clone()
                    .unwrap_or_else(|| "Anonymous User".to_string()),
                avatar_url: p.avatar_url.clone(),
                points,
                reports: count,
            }
        })
        .collect();

    entries.sort_by(|a, b| {
        b.points
            .cmp(&a.points)
            .then_with(|| a.full_name.cmp(&b.full_name))
            .then_with(|| a.user_id.cmp(&b.user_id))
    });

    assign_dense_ranks(&mut entries);

    entries.retain(|e| e.points > 0);
    entries.truncate(limit);
    entries
}

/// Assign ranks to entries already sorted by points descending
fn assign_dense_ranks(entries: &mut [LeaderboardEntry]) {
    let mut rank = 0;
    let mut previous: Option<u32> = None;
    for entry in entries.iter_mut() {
        if previous != Some(entry.points) {
            rank += 1;
            previous = Some(entry.points);
        }
        entry.rank = rank;
    }
}

pub fn user_stats(reports: &[Report], scoring: &ScoringConfig) -> UserStats {
    let mut stats = UserStats {
        total_reports: reports.len() as u32,
        ..Default::default()
    };

    for report in reports {
        match report.status {
            ReportStatus::Pending => stats.pending += 1,
            ReportStatus::InProgress => stats.in_progress += 1,
            ReportStatus::Resolved => stats.resolved += 1,
            ReportStatus::Rejected => stats.rejected += 1,
        }
    }

    stats.points = user_points(reports, scoring);

    let level = ((stats.points / TIER_STEP) as usize).min(TIERS.len() - 1);
    stats.tier = TIERS[level].to_string();
    if level + 1 < TIERS.len() {
        stats.next_tier = Some(TIERS[level + 1].to_string());
        stats.points_to_next_tier = (level as u32 + 1) * TIER_STEP - stats.points;
    }

    stats
}
