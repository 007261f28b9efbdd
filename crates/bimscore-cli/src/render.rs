//! Human-readable output.

use bimscore_engine::{PeriodSummary, ReadMode};
use bimscore_model::{EffectiveStatus, EvidenceView, ReviewStatusCounts};
use colored::{ColoredString, Colorize};

/// Trust banner, written to stderr.
pub fn banner(mode: ReadMode, message: Option<&str>) {
    let label = match mode {
        ReadMode::Backend => format!("[{}]", mode.banner()).green().bold(),
        ReadMode::Local => format!("[{}]", mode.banner()).yellow().bold(),
    };
    match message {
        Some(message) => eprintln!("{label} {message}"),
        None => eprintln!("{label}"),
    }
}

pub fn done(what: &str, detail: &str) {
    eprintln!("{} {}", "ok".green().bold(), format!("{what} {detail}").bold());
}

fn status(status: EffectiveStatus) -> ColoredString {
    let s = status.as_str();
    match status {
        EffectiveStatus::Acceptable => s.green(),
        EffectiveStatus::Rejected => s.red(),
        EffectiveStatus::NeedsRevision => s.yellow(),
        EffectiveStatus::Submitted => s.cyan(),
        EffectiveStatus::Draft => s.dimmed(),
    }
}

pub fn evidence_table(views: &[EvidenceView]) {
    if views.is_empty() {
        println!("  (no evidence)");
        return;
    }
    for view in views {
        let item = &view.item;
        println!(
            "  {:<38} {:<16} {:<5} {}",
            item.id,
            status(view.effective_status),
            item.evidence_type().as_str(),
            item.title
        );
        if let Some(review) = &view.review {
            println!(
                "  {:<38} {} {} by {}: {}",
                "",
                "→".cyan(),
                review.outcome.label(),
                review.reviewed_by,
                review.reason
            );
        }
    }
}

pub fn counts(counts: &ReviewStatusCounts) {
    println!(
        "  acceptable {}  needs revision {}  rejected {}  awaiting review {}",
        counts.acceptable.to_string().green(),
        counts.needs_revision.to_string().yellow(),
        counts.rejected.to_string().red(),
        counts.awaiting_review.to_string().cyan()
    );
}

pub fn period_summary(summary: &PeriodSummary) {
    println!(
        "{} {} {}",
        "period".bold(),
        bimscore_model::scope_key(&summary.project_id, summary.period_id.as_deref()),
        summary.status.as_str().bold()
    );
    if let Some(lock) = &summary.lock {
        println!(
            "  locked {} by {}",
            lock.locked_at.to_rfc3339(),
            lock.locked_by
        );
    }
    if let Some(snapshot) = &summary.snapshot {
        println!(
            "  snapshot {} score {:.2}",
            snapshot.snapshot_id.bold(),
            snapshot.final_bim_score
        );
        for entry in &snapshot.breakdown {
            println!("    {:<24} {:>6.2}", entry.name, entry.score);
        }
    }
    for decision in &summary.decisions {
        println!(
            "  {} {} by {}: {}",
            decision.decided_at.to_rfc3339(),
            decision.decision.label(),
            decision.decided_by,
            decision.reason
        );
    }
    counts(&summary.counts);
}
