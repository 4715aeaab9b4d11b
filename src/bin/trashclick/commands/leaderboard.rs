//! Leaderboard command

use crate::style::*;
use anyhow::Result;
use trashclick::scoring::LeaderboardEntry;

use crate::client::TrashClickClient;

pub async fn run(client: &TrashClickClient, limit: usize) -> Result<()> {
    print_header("TrashClick Leaderboard");

    let entries = client.leaderboard(limit).await?;
    if entries.is_empty() {
        print_info("No environmental points earned yet.");
        return Ok(());
    }

    println!();
    println!(
        "{:>4}  {:<24}  {:<16}  {:>8}  {:>7}",
        "Rank", "Name", "Username", "Points", "Reports"
    );
    println!("{}", "─".repeat(67));

    for entry in &entries {
        println!("{}", leaderboard_row(entry));
    }

    println!();
    println!("Showing top {}", entries.len());

    Ok(())
}

fn leaderboard_row(entry: &LeaderboardEntry) -> String {
    // Pad outside the escape codes
    let rank = format!("{:>4}", format!("#{}", entry.rank));
    let rank = match entry.rank {
        1 => style_yellow(&rank),
        2 | 3 => style_cyan(&rank),
        _ => rank,
    };
    let username = format!("{:<16}", truncate(&entry.username, 16));

    format!(
        "{}  {:<24}  {}  {:>8}  {:>7}",
        rank,
        truncate(&entry.full_name, 24),
        style_dim(&username),
        entry.points,
        entry.reports
    )
}
