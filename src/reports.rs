//! Report submission rules, listing filters and triage helpers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{non_blank, Municipality, Report, ReportStatus, StatusUpdate};

pub const MIN_DESCRIPTION_LEN: usize = 10;

/// Reports are updated in chunks of this size during a batch update
pub const BATCH_CHUNK_SIZE: usize = 10;

/// Municipality value that clears routing
pub const UNASSIGNED: &str = "unassigned";

/// Departments available before any have been created
pub fn default_municipalities() -> Vec<Municipality> {
    vec![
        Municipality::new("city-hall", "City Hall"),
        Municipality::new("waste-management", "Waste Management Department"),
        Municipality::new("parks-recreation", "Parks & Recreation"),
        Municipality::new("public-works", "Public Works"),
        Municipality::new("environmental-services", "Environmental Services"),
    ]
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// Report form as submitted by a citizen
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewReport {
    pub description: String,
    pub location: String,
    pub municipality: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Collect every problem with the form rather than stopping at the first
pub fn validate_new_report(form: &NewReport) -> Result<(), Vec<FieldError>> {
    let mut errors = Vec::new();

    let description = form.description.trim();
    if description.is_empty() {
        errors.push(FieldError::new("description", "Description is required"));
    } else if description.chars().count() < MIN_DESCRIPTION_LEN {
        errors.push(FieldError::new(
            "description",
            format!(
                "Description must be at least {} characters",
                MIN_DESCRIPTION_LEN
            ),
        ));
    }

    if form.location.trim().is_empty() {
        errors.push(FieldError::new("location", "Location is required"));
    }

    if form
        .municipality
        .as_deref()
        .map(str::trim)
        .unwrap_or_default()
        .is_empty()
    {
        errors.push(FieldError::new(
            "municipality",
            "Please select a report category",
        ));
    }

    if let Some(lat) = form.latitude {
        if !(-90.0..=90.0).contains(&lat) {
            errors.push(FieldError::new("latitude", "Latitude must be within [-90, 90]"));
        }
    }
    if let Some(lon) = form.longitude {
        if !(-180.0..=180.0).contains(&lon) {
            errors.push(FieldError::new(
                "longitude",
                "Longitude must be within [-180, 180]",
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Turn a validated form into a pending report owned by `user_id`
pub fn build_report(form: &NewReport, user_id: Uuid, now: DateTime<Utc>) -> Report {
    Report {
        id: Uuid::new_v4(),
        user_id: Some(user_id),
        description: form.description.trim().to_string(),
        location: form.location.trim().to_string(),
        latitude: form.latitude,
        longitude: form.longitude,
        image_url: form.image_url.as_deref().and_then(non_blank),
        status: ReportStatus::Pending,
        municipality: form.municipality.as_deref().and_then(non_blank),
        notes: None,
        verified: false,
        clean_up: false,
        created_at: now,
        updated_at: now,
    }
}

// ============================================================================
// LISTING
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    #[default]
    Newest,
    Oldest,
}

/// Status filter as it appears in query strings ("all" or a status name)
pub fn parse_status_filter(raw: Option<&str>) -> Result<Option<ReportStatus>, String> {
    match raw.map(str::trim) {
        None | Some("") | Some("all") => Ok(None),
        Some(s) => s.parse().map(Some),
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportFilter {
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub sort: SortOrder,
    pub search: Option<String>,
}

impl ReportFilter {
    pub fn matches(&self, report: &Report) -> bool {
        if let Some(status) = self.status {
            if report.status != status {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim) {
            Some(q) if !q.is_empty() => {
                let q = q.to_lowercase();
                report.description.to_lowercase().contains(&q)
                    || report.location.to_lowercase().contains(&q)
            }
            _ => true,
        }
    }

    /// Filter and sort in place
    pub fn apply(&self, reports: &mut Vec<Report>) {
        reports.retain(|r| self.matches(r));
        sort_reports(reports, self.sort);
    }
}

pub fn sort_reports(reports: &mut [Report], order: SortOrder) {
    match order {
        SortOrder::Newest => reports.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        SortOrder::Oldest => reports.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
    }
}

// ============================================================================
// TRIAGE
// ============================================================================

/// Admin status change as sent over the API
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: ReportStatus,
    /// Municipality id, or "unassigned"/"" to clear routing
    #[serde(default)]
    pub municipality: Option<String>,
    /// Blank clears the notes
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub verified: Option<bool>,
    #[serde(default)]
    pub clean_up: Option<bool>,
}

impl StatusChange {
    pub fn into_update(self) -> StatusUpdate {
        StatusUpdate {
            status: self.status,
            municipality: self.municipality.map(|m| routing_target(&m)),
            notes: self.notes.map(|n| non_blank(&n)),
            verified: self.verified,
            clean_up: self.clean_up,
        }
    }
}

/// Map a municipality selection to the stored value
pub fn routing_target(selection: &str) -> Option<String> {
    let selection = selection.trim();
    if selection.is_empty() || selection.eq_ignore_ascii_case(UNASSIGNED) {
        None
    } else {
        Some(selection.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchUpdate {
    pub ids: Vec<Uuid>,
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub municipality: Option<String>,
}

impl BatchUpdate {
    /// Validate and expand into the per-report update
    pub fn to_update(&self) -> Result<StatusUpdate, String> {
        if self.ids.is_empty() {
            return Err("Please select at least one report to update".to_string());
        }
        let status = self
            .status
            .ok_or_else(|| "Please select a status for the batch update".to_string())?;

        Ok(StatusUpdate {
            status,
            // A batch always writes the routing, "unassigned" included
            municipality: Some(self.municipality.as_deref().and_then(routing_target)),
            ..Default::default()
        })
    }
}

/// Count of reports per status for the admin overview
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusCounts {
    pub pending: u64,
    pub in_progress: u64,
    pub resolved: u64,
    pub rejected: u64,
}

impl StatusCounts {
    pub fn add(&mut self, status: ReportStatus, n: u64) {
        match status {
            ReportStatus::Pending => self.pending += n,
            ReportStatus::InProgress => self.in_progress += n,
            ReportStatus::Resolved => self.resolved += n,
            ReportStatus::Rejected => self.rejected += n,
        }
    }

    pub fn total(&self) -> u64 {
        self.pending + self.in_progress + self.resolved + self.rejected
    }
}

/// Lowercase dash-separated id for a new municipality
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut dash = false;
    for c in name.trim().chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            dash = false;
        } else if !dash && !slug.is_empty() {
            slug.push('-');
            dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn form() -> NewReport {
        NewReport {
            description: "Broken glass all over the playground".to_string(),
            location: "Elm Park".to_string(),
            municipality: Some("parks-recreation".to_string()),
            latitude: Some(52.37),
            longitude: Some(4.89),
            image_url: None,
        }
    }

    #[test]
    fn test_valid_report() {
        assert!(validate_new_report(&form()).is_ok());
    }

    #[test]
    fn test_description_rules() {
        let mut f = form();
        f.description = "   ".to_string();
        let errs = validate_new_report(&f).unwrap_err();
        assert_eq!(errs[0].message, "Description is required");

        f.description = " too short ".to_string();
        let errs = validate_new_report(&f).unwrap_err();
        assert_eq!(errs[0].field, "description");
        assert!(errs[0].message.contains("at least 10"));

        f.description = "exactly10!".to_string();
        assert!(validate_new_report(&f).is_ok());
    }

    #[test]
    fn test_all_errors_collected() {
        let f = NewReport {
            latitude: Some(91.0),
            longitude: Some(-181.0),
            ..Default::default()
        };
        let fields: Vec<&str> = validate_new_report(&f)
            .unwrap_err()
            .iter()
            .map(|e| e.field)
            .collect();
        assert_eq!(
            fields,
            vec!["description", "location", "municipality", "latitude", "longitude"]
        );
    }

    #[test]
    fn test_build_report_trims_and_defaults() {
        let user = Uuid::new_v4();
        let mut f = form();
        f.description = "  Broken glass all over the playground  ".to_string();
        f.image_url = Some("".to_string());
        let report = build_report(&f, user, Utc::now());
        assert_eq!(report.status, ReportStatus::Pending);
        assert_eq!(report.user_id, Some(user));
        assert_eq!(report.description, "Broken glass all over the playground");
        assert_eq!(report.image_url, None);
        assert!(!report.verified && !report.clean_up);
    }

    #[test]
    fn test_status_filter_parsing() {
        assert_eq!(parse_status_filter(None), Ok(None));
        assert_eq!(parse_status_filter(Some("all")), Ok(None));
        assert_eq!(
            parse_status_filter(Some("resolved")),
            Ok(Some(ReportStatus::Resolved))
        );
        assert!(parse_status_filter(Some("archived")).is_err());
    }

    #[test]
    fn test_filter_search_and_sort() {
        let user = Uuid::new_v4();
        let now = Utc::now();
        let mut older = build_report(&form(), user, now - Duration::hours(2));
        older.location = "Harbour Road".to_string();
        let mut newer = build_report(&form(), user, now);
        newer.description = "Oil spill near the river bank".to_string();
        newer.status = ReportStatus::Resolved;

        let mut reports = vec![older.clone(), newer.clone()];
        ReportFilter::default().apply(&mut reports);
        assert_eq!(reports[0].id, newer.id);

        let mut reports = vec![newer.clone(), older.clone()];
        ReportFilter {
            sort: SortOrder::Oldest,
            ..Default::default()
        }
        .apply(&mut reports);
        assert_eq!(reports[0].id, older.id);

        let filter = ReportFilter {
            search: Some("HARBOUR".to_string()),
            ..Default::default()
        };
        assert!(filter.matches(&older));
        assert!(!filter.matches(&newer));

        let filter = ReportFilter {
            status: Some(ReportStatus::Resolved),
            ..Default::default()
        };
        assert!(filter.matches(&newer));
        assert!(!filter.matches(&older));
    }

    #[test]
    fn test_status_change_conversion() {
        let update = StatusChange {
            status: ReportStatus::InProgress,
            municipality: Some("Unassigned".to_string()),
            notes: Some("  ".to_string()),
            verified: Some(true),
            clean_up: None,
        }
        .into_update();
        assert_eq!(update.municipality, Some(None));
        assert_eq!(update.notes, Some(None));
        assert_eq!(update.verified, Some(true));

        let update = StatusChange {
            status: ReportStatus::Resolved,
            municipality: Some("public-works".to_string()),
            ..Default::default()
        }
        .into_update();
        assert_eq!(update.municipality, Some(Some("public-works".to_string())));
        assert_eq!(update.notes, None);
    }

    #[test]
    fn test_batch_update_validation() {
        let empty = BatchUpdate {
            ids: vec![],
            status: Some(ReportStatus::Resolved),
            municipality: None,
        };
        assert!(empty.to_update().is_err());

        let no_status = BatchUpdate {
            ids: vec![Uuid::new_v4()],
            status: None,
            municipality: None,
        };
        assert!(no_status.to_update().is_err());

        let ok = BatchUpdate {
            ids: vec![Uuid::new_v4()],
            status: Some(ReportStatus::Rejected),
            municipality: Some("unassigned".to_string()),
        };
        let update = ok.to_update().unwrap();
        assert_eq!(update.status, ReportStatus::Rejected);
        assert_eq!(update.municipality, Some(None));
    }

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Parks & Recreation"), "parks-recreation");
        assert_eq!(slugify("  Waste   Management!! "), "waste-management");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn test_status_counts() {
        let mut counts = StatusCounts::default();
        counts.add(ReportStatus::Pending, 3);
        counts.add(ReportStatus::Resolved, 2);
        assert_eq!(counts.total(), 5);
        assert_eq!(counts.in_progress, 0);
    }
}
