use std::path::Path;

use serde::Serialize;

use crate::access::Session;
use crate::types::{Result, Revision};

const MAX_FINDINGS: usize = 32;

/// Specifies the depth of verification checks to perform.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyLevel {
    /// Newest revision only.
    Fast,
    /// Every published revision.
    Full,
}

/// Indicates the severity level of a verification finding.
#[derive(Clone, Copy, Debug, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifySeverity {
    /// Findings were truncated.
    Warning,
    /// A revision or page could not be read back.
    Error,
}

/// Represents a single issue discovered during verification.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyFinding {
    /// The severity level of this finding.
    pub severity: VerifySeverity,
    /// Human-readable description of the issue.
    pub message: String,
}

/// What was examined.
#[derive(Clone, Debug, Default, Serialize)]
pub struct VerifyCounts {
    /// Revisions whose roots were read.
    pub revisions_checked: u64,
    /// Logical node pages reconstructed.
    pub pages_checked: u64,
    /// Live records seen across all checked pages.
    pub records_found: u64,
}

/// Complete report of a verification operation.
#[derive(Clone, Debug, Serialize)]
pub struct VerifyReport {
    /// The verification level that was performed.
    pub level: VerifyLevel,
    /// Whether verification passed without finding any issues.
    pub success: bool,
    /// List of issues discovered during verification.
    pub findings: Vec<VerifyFinding>,
    /// Statistics about the pages examined.
    pub counts: VerifyCounts,
}

/// Reconstructs every node page reachable from the checked revisions.
///
/// Read failures become findings; only failing to open the resource is an
/// error.
pub fn verify(dir: impl AsRef<Path>, level: VerifyLevel) -> Result<VerifyReport> {
    let session = Session::open(dir)?;
    let mut findings = Vec::new();
    let mut counts = VerifyCounts::default();
    let latest = session.latest_revision()?.0;
    let first = match level {
        VerifyLevel::Fast => latest,
        VerifyLevel::Full => 0,
    };
    for revision in first..=latest {
        if let Err(err) = verify_revision(&session, Revision(revision), &mut findings, &mut counts) {
            push_error(&mut findings, format!("revision {revision}: {err}"));
        }
    }
    session.close()?;
    Ok(VerifyReport {
        level,
        success: findings.is_empty(),
        findings,
        counts,
    })
}

fn verify_revision(
    session: &Session,
    revision: Revision,
    findings: &mut Vec<VerifyFinding>,
    counts: &mut VerifyCounts,
) -> Result<()> {
    let read = session.begin_read_at(revision)?;
    counts.revisions_checked += 1;
    for page_key in read.page_keys()? {
        match read.node_page(page_key) {
            Ok(Some(page)) => {
                counts.pages_checked += 1;
                counts.records_found += page.slots().iter().filter(|s| s.value().is_some()).count() as u64;
            }
            Ok(None) => push_error(
                findings,
                format!("revision {revision}: page {page_key} listed but unreachable"),
            ),
            Err(err) => push_error(findings, format!("revision {revision}: page {page_key}: {err}")),
        }
    }
    Ok(())
}

fn push_error(findings: &mut Vec<VerifyFinding>, message: impl Into<String>) {
    if findings.len() < MAX_FINDINGS {
        findings.push(VerifyFinding {
            severity: VerifySeverity::Error,
            message: message.into(),
        });
    } else if findings.len() == MAX_FINDINGS {
        findings.push(VerifyFinding {
            severity: VerifySeverity::Warning,
            message: "further findings suppressed".into(),
        });
    }
}
