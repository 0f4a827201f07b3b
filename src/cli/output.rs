//! CLI output formatting

use crate::{
    core::{ExecutionStatus, FailureKind},
    execution::ExecutionEvent,
    persistence::{RunSummary, WorkflowStats},
    process::OutputStream,
};
use chrono::{DateTime, Utc};
use console::Emoji;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static ROCKET: Emoji<'_, '_> = Emoji("🚀 ", "> ");
pub static SKIP: Emoji<'_, '_> = Emoji("⏭️  ", "- ");

/// Format an execution status for display
pub fn format_status(status: ExecutionStatus) -> String {
    match status {
        ExecutionStatus::Pending => style("PENDING").dim().to_string(),
        ExecutionStatus::Running => style("RUNNING").yellow().to_string(),
        ExecutionStatus::Succeeded => style("SUCCEEDED").green().to_string(),
        ExecutionStatus::Failed => style("FAILED").red().to_string(),
        ExecutionStatus::Cancelled => style("CANCELLED").yellow().to_string(),
    }
}

fn status_icon(status: ExecutionStatus) -> Emoji<'static, 'static> {
    match status {
        ExecutionStatus::Succeeded => CHECK,
        ExecutionStatus::Failed => CROSS,
        ExecutionStatus::Running => SPINNER,
        ExecutionStatus::Cancelled => WARN,
        ExecutionStatus::Pending => INFO,
    }
}

fn short_id(id: &uuid::Uuid) -> String {
    id.to_string()[..8].to_string()
}

/// `1m 05s` style elapsed time
pub fn format_duration(started: DateTime<Utc>, completed: Option<DateTime<Utc>>) -> String {
    let Some(completed) = completed else {
        return "-".to_string();
    };
    let secs = (completed - started).num_seconds().max(0);
    if secs >= 60 {
        format!("{}m {:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// One line per run, used by `history`
pub fn format_run_summary(summary: &RunSummary) -> String {
    format!(
        "{} {} - {} - {} on {} - {} ({}/{} jobs) - {}",
        status_icon(summary.status),
        style(short_id(&summary.run_id)).dim(),
        style(&summary.workflow_name).bold(),
        summary.event,
        style(&summary.branch).cyan(),
        format_status(summary.status),
        summary.succeeded_jobs(),
        summary.jobs.len(),
        format_duration(summary.started_at, summary.completed_at),
    )
}

/// Full breakdown of one run, used by `history --run-id`
pub fn format_run_details(summary: &RunSummary) -> String {
    let mut lines = vec![
        format!("Run:      {}", summary.run_id),
        format!("Workflow: {}", style(&summary.workflow_name).bold()),
        format!("Event:    {} on {}", summary.event, summary.branch),
        format!("Status:   {}", format_status(summary.status)),
        format!(
            "Started:  {}",
            summary.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ),
        format!(
            "Duration: {}",
            format_duration(summary.started_at, summary.completed_at)
        ),
        String::new(),
    ];
    for job in &summary.jobs {
        lines.push(format!(
            "  {}{} {}",
            status_icon(job.status),
            style(&job.job_id).bold(),
            format_status(job.status)
        ));
        if let (Some(step), Some(error)) = (&job.failed_step, &job.error) {
            let kind = job.failure_kind.unwrap_or(FailureKind::Internal);
            lines.push(format!(
                "      step {} failed ({}): {}",
                style(step).red(),
                kind,
                style(error).dim()
            ));
        }
    }
    lines.join("\n")
}

/// One line per workflow, used by `list`
pub fn format_workflow_stats(stats: &WorkflowStats, with_counts: bool) -> String {
    if with_counts {
        format!(
            "{} ({} runs, {} succeeded, {} failed)",
            style(&stats.name).bold(),
            stats.runs,
            style(stats.succeeded).green(),
            style(stats.failed).red()
        )
    } else {
        style(&stats.name).bold().to_string()
    }
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::WorkflowStarted {
            run_id,
            workflow_name,
            event,
            job_count,
        } => format!(
            "{} Starting workflow {} ({}) for {} on {} - {} job(s)",
            ROCKET,
            style(workflow_name).bold(),
            style(short_id(run_id)).dim(),
            event.kind,
            style(&event.branch).cyan(),
            job_count
        ),
        ExecutionEvent::WorkflowSkipped {
            workflow_name,
            event,
        } => format!(
            "{} Workflow {} is not triggered by {} on {}",
            INFO,
            style(workflow_name).bold(),
            event.kind,
            style(&event.branch).cyan()
        ),
        ExecutionEvent::JobStarted { job_id, step_count } => format!(
            "{} Job {} ({} steps)",
            ROCKET,
            style(job_id).bold(),
            step_count
        ),
        ExecutionEvent::StepStarted {
            job_id,
            step_name,
            ..
        } => format!(
            "{} [{}] {}",
            SPINNER,
            style(job_id).dim(),
            style(step_name).cyan()
        ),
        ExecutionEvent::StepOutputLine {
            job_id,
            stream,
            line,
            ..
        } => match stream {
            OutputStream::Stdout => format!("  {} {}", style(job_id).dim(), line),
            OutputStream::Stderr => format!("  {} {}", style(job_id).dim(), style(line).yellow()),
        },
        ExecutionEvent::StepSucceeded {
            job_id, step_id, ..
        } => format!(
            "{} [{}] {}",
            CHECK,
            style(job_id).dim(),
            style(step_id).green()
        ),
        ExecutionEvent::StepFailed {
            job_id,
            step_id,
            kind,
            error,
            ..
        } => format!(
            "{} [{}] {} ({}): {}",
            CROSS,
            style(job_id).dim(),
            style(step_id).red(),
            kind,
            style(error).dim()
        ),
        ExecutionEvent::StepSkipped {
            job_id,
            step_id,
            reason,
        } => format!(
            "{} [{}] {} skipped: {}",
            SKIP,
            style(job_id).dim(),
            style(step_id).dim(),
            reason
        ),
        ExecutionEvent::JobCompleted { job_id, status } => format!(
            "{} Job {} {}",
            status_icon(*status),
            style(job_id).bold(),
            format_status(*status)
        ),
        ExecutionEvent::WorkflowCompleted { run_id, status } => format!(
            "{} Workflow ({}) {}",
            status_icon(*status),
            style(short_id(run_id)).dim(),
            format_status(*status)
        ),
    }
}

/// Format step output with truncation, keeping the last `max_lines`
pub fn format_output(output: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();

    if lines.len() <= max_lines {
        output.to_string()
    } else {
        let tail = lines[lines.len() - max_lines..].join("\n");
        format!(
            "{}... ({} earlier lines)\n{}",
            style("[truncated]").dim(),
            lines.len() - max_lines,
            tail
        )
    }
}
