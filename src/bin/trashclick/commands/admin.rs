//! Admin commands - report triage

use crate::client::TrashClickClient;
use crate::commands::reports::print_reports;
use crate::style::*;
use crate::AdminAction;
use anyhow::{anyhow, Result};
use trashclick::models::ReportStatus;
use trashclick::reports::{BatchUpdate, StatusChange};

fn parse_status(raw: &str) -> Result<ReportStatus> {
    raw.parse().map_err(|e: String| anyhow!(e))
}

pub async fn run(client: &TrashClickClient, action: AdminAction) -> Result<()> {
    match action {
        AdminAction::Overview => {
            let overview = client.admin_overview().await?;
            print_header("Admin Overview");
            println!();
            println!("Administrators:   {}", overview.admin_count);
            if overview.single_admin {
                print_warning("You are the only administrator. Consider inviting another.");
            }
            println!();
            println!("{}", style_bold("Reports:"));
            println!("  Pending:        {}", overview.reports.pending);
            println!("  In progress:    {}", overview.reports.in_progress);
            println!("  Resolved:       {}", overview.reports.resolved);
            println!("  Rejected:       {}", overview.reports.rejected);
            println!("  Total:          {}", overview.total_reports);
        }
        AdminAction::Reports { status } => {
            print_header("All Reports");
            let reports = client.admin_reports(status.as_deref()).await?;
            if reports.is_empty() {
                print_info("No reports found.");
                return Ok(());
            }
            print_reports(&reports);
        }
        AdminAction::Update {
            id,
            status,
            municipality,
            notes,
            verified,
            clean_up,
        } => {
            let change = StatusChange {
                status: parse_status(&status)?,
                municipality,
                notes,
                verified,
                clean_up,
            };
            let report = client.update_report(id, &change).await?;
            print_success(&format!(
                "Report {} is now {}",
                report.id,
                style_status(report.status)
            ));
            if let Some(municipality) = &report.municipality {
                println!("  Routed to: {}", municipality);
            }
        }
        AdminAction::Batch {
            status,
            municipality,
            ids,
        } => {
            let batch = BatchUpdate {
                ids,
                status: Some(parse_status(&status)?),
                municipality,
            };
            let result = client.batch_update(&batch).await?;
            print_success(&format!(
                "Updated {} of {} reports",
                result.updated, result.requested
            ));
        }
    }
    Ok(())
}
