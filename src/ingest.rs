//! Mailbox ingestion — the binary-side collaborator.
//!
//! Reads a directory of plain-text email files in lexical filename order.
//! Supported format: optional `Header: value` lines (From/Subject/Date),
//! a blank line, then the body; a file with no blank line is all body.
//! MIME/.eml decoding is out of scope — upstream tooling is expected to
//! hand us plain text.

use std::path::Path;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info};

use crate::error::IngestError;
use crate::extract::Extractor;
use crate::triage::types::Email;

/// Parse one plain-text email file's content.
///
/// `received_fallback` is used when the file carries no parsable `Date:`
/// header.
pub fn parse_plain_email(
    content: &str,
    extractor: &Extractor,
    received_fallback: DateTime<Utc>,
) -> Email {
    let (header_part, body) = match content.split_once("\n\n") {
        Some((headers, body)) => (Some(headers), body),
        None => (None, content),
    };

    let mut sender = String::new();
    let mut subject = String::new();
    let mut received_at = received_fallback;

    if let Some(headers) = header_part {
        for line in headers.lines() {
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim().to_ascii_lowercase().as_str() {
                "from" => sender = value.to_string(),
                "subject" => subject = value.to_string(),
                "date" => {
                    if let Ok(parsed) = DateTime::parse_from_rfc2822(value) {
                        received_at = parsed.with_timezone(&Utc);
                    }
                }
                _ => {}
            }
        }
    }

    let body = body.trim().to_string();
    let entities = extractor.entities(&format!("{subject} {body}"));
    Email {
        sender,
        subject,
        body,
        received_at,
        entities,
    }
}

/// Parse a single mailbox file. Only `.txt` is supported here.
pub async fn parse_mailbox_file(
    path: impl AsRef<Path>,
    extractor: &Extractor,
) -> Result<Email, IngestError> {
    let path = path.as_ref();
    match path.extension().and_then(|e| e.to_str()) {
        Some("txt") => {}
        other => {
            return Err(IngestError::UnsupportedExtension(
                other.unwrap_or("").to_string(),
            ));
        }
    }
    let content = fs::read_to_string(path).await?;
    Ok(parse_plain_email(&content, extractor, Utc::now()))
}

/// Load every `.txt` email under `dir`, in lexical filename order.
pub async fn load_mailbox(
    dir: impl AsRef<Path>,
    extractor: &Extractor,
) -> Result<Vec<Email>, IngestError> {
    let dir = dir.as_ref();
    let mut read_dir = fs::read_dir(dir).await?;

    let mut paths = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("txt") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut emails = Vec::with_capacity(paths.len());
    for path in paths {
        let email = parse_mailbox_file(&path, extractor).await?;
        debug!(path = %path.display(), sender = %email.sender, "Ingested email");
        emails.push(email);
    }

    info!(count = emails.len(), dir = %dir.display(), "Mailbox loaded");
    Ok(emails)
}
