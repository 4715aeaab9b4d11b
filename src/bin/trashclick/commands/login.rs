//! Login and register commands

use crate::client::TrashClickClient;
use crate::style::*;
use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Input, Password};
use trashclick::service::AuthSession;

fn prompt_email(email: Option<String>) -> Result<String> {
    match email {
        Some(email) => Ok(email),
        None => Ok(Input::with_theme(&ColorfulTheme::default())
            .with_prompt("  Email")
            .validate_with(|input: &String| -> Result<(), &str> {
                if input.contains('@') {
                    Ok(())
                } else {
                    Err("Please enter a valid email address")
                }
            })
            .interact_text()?),
    }
}

fn print_session(session: &AuthSession) {
    println!();
    print_success(&format!(
        "Signed in as {}",
        style_cyan(&session.profile.email)
    ));
    println!(
        "  Session expires {}",
        style_dim(&session.expires_at.format("%Y-%m-%d %H:%M UTC").to_string())
    );
    println!();
    println!("  export TRASHCLICK_TOKEN={}", session.token);
    println!();
}

pub async fn run(client: &TrashClickClient, email: Option<String>) -> Result<()> {
    print_header("TrashClick Login");

    let email = prompt_email(email)?;
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("  Password")
        .interact()?;

    let session = client.login(&email, &password).await?;
    print_session(&session);
    Ok(())
}

pub async fn register(
    client: &TrashClickClient,
    email: Option<String>,
    name: Option<String>,
) -> Result<()> {
    print_header("Create a TrashClick Account");

    let email = prompt_email(email)?;
    let password = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("  Password")
        .with_confirmation("  Repeat password", "Passwords do not match")
        .interact()?;

    let session = client.register(&email, &password, name.as_deref()).await?;
    print_session(&session);
    Ok(())
}
