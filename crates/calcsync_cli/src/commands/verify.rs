//! Verify command implementation.

use super::{open_service, CommandResult};
use crate::config::CliConfig;
use calcsync_core::{CheckCategory, Severity};
use calcsync_integrity::CheckResult;
use std::path::Path;

/// Runs the verify command.
///
/// Fails when any check found an issue of `error` severity or worse that
/// is still open afterwards.
pub fn run(
    path: &Path,
    config: &CliConfig,
    check: Option<&str>,
    fix: Option<&str>,
) -> CommandResult {
    let ceiling: Option<Severity> = fix.map(str::parse).transpose()?;
    if ceiling == Some(Severity::Critical) {
        return Err("critical issues are never fixed automatically".into());
    }

    let service = open_service(path, config)?;
    println!("Verifying store at {}", path.display());
    println!();

    let results = match check {
        Some(name) => vec![service.run_check(name.parse::<CheckCategory>()?)?],
        None => service.run_all_checks()?,
    };
    for result in &results {
        print_result(result);
    }

    if let Some(ceiling) = ceiling {
        let report = service.auto_fix_issues(ceiling)?;
        println!();
        println!("Auto-fix up to {ceiling}: {} fixed", report.fixed.len());
        for issue in &report.fixed {
            let method = issue.fix_method.map(|m| m.to_string()).unwrap_or_default();
            println!("  ✓ {} ({method})", issue.description);
        }
    }

    let blocking = service
        .list_issues(true)?
        .into_iter()
        .filter(|issue| issue.severity >= Severity::Error)
        .count();
    service.store().close()?;

    println!();
    if blocking == 0 {
        println!("✓ Store verification passed");
        Ok(())
    } else {
        println!("✗ Store verification failed: {blocking} open issue(s)");
        Err("Verification failed".into())
    }
}

fn print_result(result: &CheckResult) {
    let mark = if result.passed { "✓" } else { "✗" };
    println!(
        "{mark} {:<12} {} issue(s) in {:?}",
        result.category.as_str(),
        result.issues.len(),
        result.duration
    );
    for issue in &result.issues {
        let record = issue
            .record_id
            .as_deref()
            .map(|r| format!(" [{r}]"))
            .unwrap_or_default();
        println!(
            "    {:<8} {}{record}: {}",
            issue.severity.as_str(),
            issue.table,
            issue.description
        );
        if let Some(remedy) = &issue.remedy {
            println!("             remedy: {remedy}");
        }
    }
}
