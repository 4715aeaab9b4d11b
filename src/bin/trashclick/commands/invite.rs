//! Invite commands - administrator invitations

use crate::client::TrashClickClient;
use crate::style::*;
use crate::InviteAction;
use anyhow::Result;
use trashclick::invite::InviteValidity;

pub async fn run(client: &TrashClickClient, action: InviteAction) -> Result<()> {
    match action {
        InviteAction::Create { email } => {
            let created = client.create_invite(&email).await?;
            print_success(&format!("Invitation created for {}", created.invite.email));
            println!();
            println!("Accept link:      {}", style_cyan(&created.accept_url));
            println!(
                "Expires:          {}",
                created.invite.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
        }
        InviteAction::List => {
            print_header("Pending Invitations");
            let invites = client.pending_invites().await?;
            if invites.is_empty() {
                print_info("No pending invitations.");
                return Ok(());
            }
            println!();
            for invite in &invites {
                println!(
                    "{}  {:<32}  expires {}",
                    style_dim(&invite.id.to_string()),
                    invite.email,
                    invite.expires_at.format("%Y-%m-%d")
                );
            }
        }
        InviteAction::Revoke { id } => {
            client.revoke_invite(id).await?;
            print_success("Invitation revoked");
        }
    }
    Ok(())
}

pub async fn check(client: &TrashClickClient, token: &str) -> Result<()> {
    let check = client.check_invite(token).await?;
    match check.status {
        InviteValidity::Valid => {
            print_success(&check.message);
            if let Some(email) = &check.email {
                println!("  For:      {}", email);
            }
            if let Some(expires_at) = check.expires_at {
                println!("  Expires:  {}", expires_at.format("%Y-%m-%d %H:%M UTC"));
            }
        }
        InviteValidity::Expired | InviteValidity::Used => print_warning(&check.message),
        InviteValidity::Invalid => print_error(&check.message),
    }
    Ok(())
}

pub async fn accept(client: &TrashClickClient, token: &str) -> Result<()> {
    let profile = client.accept_invite(token).await?;
    print_success(&format!(
        "{} is now an administrator",
        style_cyan(&profile.email)
    ));
    Ok(())
}
