//! Report command - submit a new report, optionally with a photo

use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use trashclick::reports::{validate_new_report, NewReport};

use crate::client::TrashClickClient;
use crate::style::*;

/// Content type for an image file, judged by extension
fn image_content_type(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        "gif" => Some("image/gif"),
        "webp" => Some("image/webp"),
        "heic" => Some("image/heic"),
        _ => None,
    }
}

pub async fn run(client: &TrashClickClient, mut form: NewReport, image: Option<&Path>) -> Result<()> {
    print_header("New Report");

    if let Err(errors) = validate_new_report(&form) {
        for error in &errors {
            print_error(&format!("{}: {}", error.field, error.message));
        }
        return Err(anyhow!("Report is incomplete"));
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("  {spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(80));

    if let Some(path) = image {
        let content_type = image_content_type(path)
            .ok_or_else(|| anyhow!("{} is not a supported image", path.display()))?;
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("photo.jpg");

        pb.set_message("Uploading photo...");
        let stored = match client.upload_image(filename, content_type, bytes).await {
            Ok(stored) => stored,
            Err(e) => {
                pb.finish_and_clear();
                return Err(e);
            }
        };
        form.image_url = Some(stored.url);
    }

    pb.set_message("Submitting report...");
    let result = client.submit_report(&form).await;
    pb.finish_and_clear();
    let report = result?;

    print_success("Report submitted, thank you!");
    println!();
    println!("ID:               {}", style_dim(&report.id.to_string()));
    println!("Status:           {}", style_status(report.status));
    println!("Location:         {}", report.location);
    if let Some(url) = &report.image_url {
        println!("Photo:            {}", url);
    }

    Ok(())
}
