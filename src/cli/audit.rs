//! Audit subcommand for taskboard CLI
//!
//! Scans both collections for broken assignment references and prints the
//! report as JSON. With `--repair` the idempotent fixes are applied and the
//! collections are scanned again.

use crate::sync::{AuditReport, RelationshipSynchronizer};
use anyhow::Result;
use clap::Args;
use serde::Serialize;
use std::io::Write;

/// Arguments for the audit subcommand
#[derive(Args, Debug)]
pub struct AuditArgs {
    /// Apply fixes for every reported violation
    #[arg(long)]
    pub repair: bool,
}

#[derive(Debug, Serialize)]
pub struct AuditOutcome {
    pub before: AuditReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repaired: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<AuditReport>,
}

impl AuditOutcome {
    /// Whether the final state (after repair, if any) is consistent.
    pub fn is_consistent(&self) -> bool {
        self.after.as_ref().unwrap_or(&self.before).is_consistent()
    }
}

pub fn run_audit(sync: &RelationshipSynchronizer, args: &AuditArgs) -> Result<AuditOutcome> {
    let before = sync.audit()?;
    if !args.repair || before.violations.is_empty() {
        return Ok(AuditOutcome {
            before,
            repaired: None,
            after: None,
        });
    }

    let repaired = sync.repair(&before)?;
    let after = sync.audit()?;
    Ok(AuditOutcome {
        before,
        repaired: Some(repaired),
        after: Some(after),
    })
}

/// Write the outcome as pretty JSON.
pub fn print_outcome(outcome: &AuditOutcome, mut out: impl Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut out, outcome)?;
    writeln!(out)?;
    Ok(())
}
