//! Reports command - list your own reports

use crate::client::TrashClickClient;
use crate::style::*;
use anyhow::Result;
use trashclick::models::Report;

pub fn print_reports(reports: &[Report]) {
    println!();
    println!(
        "{:<36}  {:<12}  {:<10}  {:<20}  Description",
        "ID", "Status", "Created", "Location"
    );
    println!("{}", "─".repeat(120));

    for report in reports {
        let mut flags = String::new();
        if report.verified {
            flags.push_str(" [verified]");
        }
        if report.clean_up {
            flags.push_str(" [clean-up]");
        }
        // Pad outside the escape codes
        let status = format!(
            "{}{}",
            style_status(report.status),
            " ".repeat(12usize.saturating_sub(report.status.label().len()))
        );
        println!(
            "{}  {}  {:<10}  {:<20}  {}{}",
            style_dim(&report.id.to_string()),
            status,
            report.created_at.format("%Y-%m-%d"),
            truncate(&report.location, 20),
            truncate(&report.description, 40),
            style_green(&flags)
        );
    }

    println!();
    println!("Total: {}", reports.len());
}

pub async fn run(
    client: &TrashClickClient,
    status: Option<&str>,
    sort: Option<&str>,
    search: Option<&str>,
) -> Result<()> {
    print_header("My Reports");

    let reports = client.my_reports(status, sort, search).await?;
    if reports.is_empty() {
        print_info("No reports found.");
        return Ok(());
    }

    print_reports(&reports);
    Ok(())
}
