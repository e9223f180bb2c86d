//! Build commands.

use anyhow::Result;
use kiln_core::{BuildRecord, BuildStatus};

use super::ApiClient;

pub async fn list(api_url: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let records: Vec<BuildRecord> = client.get("api/v1/builds").await?;
    if records.is_empty() {
        println!("No builds");
        return Ok(());
    }
    for record in &records {
        println!("{}", format_line(record));
    }
    Ok(())
}

pub async fn show(api_url: &str, id: &str) -> Result<()> {
    let client = ApiClient::new(api_url)?;
    let record: BuildRecord = client.get(&format!("api/v1/builds/{}", id)).await?;
    print_record(&record);
    Ok(())
}

fn status_marker(status: BuildStatus) -> &'static str {
    match status {
        BuildStatus::Processing => "…",
        BuildStatus::Success => "✓",
        BuildStatus::Failed => "✗",
    }
}

/// One-line summary used by `builds list`.
pub fn format_line(record: &BuildRecord) -> String {
    let summary = record.summary();
    format!(
        "{} {}  {:<10} {}/{}  {}  {}",
        status_marker(record.status),
        record.id,
        record.status.as_str(),
        summary.repository,
        record.branch(),
        summary.author,
        summary.message
    )
}

pub fn print_record(record: &BuildRecord) {
    println!("Build {}", record.id);
    println!("  status:     {}", record.status);
    println!("  repository: {} ({})", record.repository.name, record.repository.url);
    println!("  ref:        {}", record.r#ref);
    println!("  commit:     {}", record.url);
    println!("  author:     {} <{}>", record.author.name, record.author.email);
    println!("  committed:  {}", record.timestamp);
    if let Some(time) = record.build_time {
        println!("  finished:   {}", time.to_rfc3339());
    }
    println!("  message:    {}", record.message.lines().next().unwrap_or_default());
    if !record.error.is_empty() {
        println!("  error:");
        for line in record.error.lines() {
            println!("    {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_core::BuildId;
    use serde_json::json;

    #[test]
    fn test_format_line() {
        let id = BuildId::new();
        let record: BuildRecord = serde_json::from_value(json!({
            "id": id,
            "repository": {"url": "https://github.com/acme/widgets", "name": "widgets", "description": ""},
            "url": "https://github.com/acme/widgets/commit/abc",
            "author": {"name": "dev", "email": "dev@acme.test"},
            "message": "Fix things\n\nbody",
            "timestamp": "2024-01-02T03:04:05Z",
            "ref": "refs/heads/main",
            "status": "failed",
            "error": "boom",
            "build_time": null,
            "created_at": "2024-01-02T03:05:00Z"
        }))
        .unwrap();

        let line = format_line(&record);
        assert!(line.starts_with(&format!("✗ {}", id)));
        assert!(line.contains("widgets/main"));
        assert!(line.ends_with("dev  Fix things"));
    }
}
