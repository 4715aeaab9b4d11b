//! Dashboard command - personal points and recent reports

use crate::client::TrashClickClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(client: &TrashClickClient) -> Result<()> {
    let dashboard = client.dashboard().await?;
    let stats = &dashboard.stats;

    let name = dashboard
        .profile
        .full_name
        .as_deref()
        .unwrap_or(&dashboard.profile.email);
    print_header(&format!("Dashboard - {}", name));

    println!();
    println!("Points:           {}", style_green(&stats.points.to_string()));
    println!("Tier:             {}", style_cyan(&stats.tier));
    match &stats.next_tier {
        Some(next) => println!(
            "Next tier:        {} ({} points to go)",
            next, stats.points_to_next_tier
        ),
        None => println!("Next tier:        {}", style_dim("top tier reached")),
    }

    println!();
    println!("{}", style_bold("Reports:"));
    println!("  Total:          {}", stats.total_reports);
    println!("  Pending:        {}", stats.pending);
    println!("  In progress:    {}", stats.in_progress);
    println!("  Resolved:       {}", stats.resolved);
    println!("  Rejected:       {}", stats.rejected);

    if !dashboard.recent_reports.is_empty() {
        println!();
        println!("{}", style_bold("Recent:"));
        for report in &dashboard.recent_reports {
            println!(
                "  {}  {:<12}  {}",
                style_dim(&report.created_at.format("%Y-%m-%d").to_string()),
                style_status(report.status),
                truncate(&report.description, 48)
            );
        }
    }

    Ok(())
}
