//! Municipalities command

use crate::client::TrashClickClient;
use crate::style::*;
use anyhow::Result;
use trashclick::models::MemberRole;

pub async fn run(client: &TrashClickClient, create: Option<&str>) -> Result<()> {
    if let Some(name) = create {
        let municipality = client.create_municipality(name).await?;
        print_success(&format!(
            "Created {} ({})",
            municipality.name,
            style_dim(&municipality.id)
        ));
        return Ok(());
    }

    print_header("Municipality Departments");
    let municipalities = client.municipalities().await?;
    println!();
    for m in &municipalities {
        println!("  {:<28}  {}", style_cyan(&m.id), m.name);
    }
    Ok(())
}

pub async fn add_member(
    client: &TrashClickClient,
    municipality_id: &str,
    email: &str,
    admin: bool,
) -> Result<()> {
    let role = if admin {
        MemberRole::Admin
    } else {
        MemberRole::Member
    };
    let members = client.add_member(municipality_id, email, role).await?;
    print_success(&format!("Added {} to {}", email, style_cyan(municipality_id)));

    println!();
    for m in &members {
        let role = match m.role {
            MemberRole::Admin => style_yellow("admin"),
            MemberRole::Member => "member".to_string(),
        };
        println!("  {:<32}  {}", m.email.as_deref().unwrap_or("-"), role);
    }
    Ok(())
}
