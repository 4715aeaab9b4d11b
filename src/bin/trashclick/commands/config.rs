//! Config command - show client settings and server health

use crate::client::TrashClickClient;
use crate::style::*;
use anyhow::Result;

pub async fn run(client: &TrashClickClient) -> Result<()> {
    print_header("TrashClick Configuration");

    println!();
    println!("API endpoint:     {}", style_cyan(client.base_url()));
    println!(
        "Session token:    {}",
        if client.has_token() {
            style_green("set")
        } else {
            style_yellow("not set (TRASHCLICK_TOKEN)")
        }
    );

    println!();
    match client.health().await {
        Ok(health) => {
            println!(
                "Server version:   {}",
                health["version"].as_str().unwrap_or("?")
            );
            println!(
                "Uptime:           {}s",
                health["uptime_secs"].as_u64().unwrap_or(0)
            );
            print_success("Server is reachable");
        }
        Err(e) => print_error(&format!("Server unreachable: {}", e)),
    }

    if client.has_token() {
        match client.profile().await {
            Ok(profile) => println!(
                "Signed in as:     {} ({})",
                profile.email,
                if profile.is_admin() { "admin" } else { "user" }
            ),
            Err(e) => print_warning(&format!("Token rejected: {}", e)),
        }
    }

    Ok(())
}
