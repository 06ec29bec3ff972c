//! Markdown and JSON rendering for a finalized `Report` (§4.1 "Rendering").

use super::{ConfirmKind, ItemStatus, MODULE_PREFIXES, Report, StepStatus, Totals};
use serde_json::{Map, Value, json};

fn status_label(s: StepStatus) -> &'static str {
    match s {
        StepStatus::Pending => "pending",
        StepStatus::Success => "success",
        StepStatus::SuccessWithWarnings => "success (with warnings)",
        StepStatus::Failed => "failed",
    }
}

fn confirm_kind_label(k: ConfirmKind) -> &'static str {
    match k {
        ConfirmKind::Confirm => "confirm",
        ConfirmKind::Retype => "retype",
        ConfirmKind::Select => "select",
    }
}

/// Groups metric keys into the static module-prefix sections (§4.1). A
/// prefix with no matching metric key in this run is omitted entirely.
fn module_sections(report: &Report) -> Vec<(&'static str, Vec<(&String, &i64)>)> {
    MODULE_PREFIXES
        .iter()
        .filter_map(|(prefix, label)| {
            let metrics: Vec<(&String, &i64)> = report
                .metrics
                .iter()
                .filter(|(k, _)| k.starts_with(prefix))
                .collect();
            if metrics.is_empty() {
                None
            } else {
                Some((*label, metrics))
            }
        })
        .collect()
}

pub fn to_markdown(
    report: &Report,
    totals: &Totals,
    mask: &dyn Fn(&str, &str) -> String,
) -> String {
    let mut out = String::new();
    out.push_str(&format!("# {}\n\n", report.title));
    out.push_str(&format!("- **Session**: {}\n", report.session_id));
    out.push_str(&format!(
        "- **Date**: {}\n",
        report.start_time.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    out.push_str(&format!("- **Status**: {}\n", totals.status));
    out.push_str(&format!("- **Duration**: {}s\n\n", totals.elapsed_secs));

    if !report.meta.is_empty() {
        out.push_str("## Metadata\n\n| Key | Value |\n|---|---|\n");
        for (k, v) in &report.meta {
            out.push_str(&format!("| {} | {} |\n", k, mask(k, v)));
        }
        out.push('\n');
    }

    out.push_str("## Summary\n\n");
    out.push_str("| Metric | Count |\n|---|---|\n");
    out.push_str(&format!("| Phases | {} |\n", totals.phases));
    out.push_str(&format!("| Steps succeeded | {} |\n", totals.steps_success));
    out.push_str(&format!("| Steps failed | {} |\n", totals.steps_failed));
    out.push_str(&format!("| Items ok | {} |\n", totals.items_ok));
    out.push_str(&format!("| Items failed | {} |\n", totals.items_fail));
    out.push_str(&format!("| Items skipped | {} |\n", totals.items_skip));
    out.push_str(&format!("| Items warned | {} |\n\n", totals.items_warn));

    if !report.metrics.is_empty() {
        out.push_str("## Metrics\n\n| Key | Value |\n|---|---|\n");
        for (k, v) in &report.metrics {
            out.push_str(&format!("| {k} | {v} |\n"));
        }
        out.push('\n');
    }

    for (label, metrics) in module_sections(report) {
        out.push_str(&format!("### {label}\n\n| Key | Value |\n|---|---|\n"));
        for (k, v) in metrics {
            out.push_str(&format!("| {k} | {v} |\n"));
        }
        out.push('\n');
    }

    for (phase_idx, phase) in report.phases.iter().enumerate() {
        out.push_str(&format!("## Phase: {}\n\n", phase.name));
        for (step_idx, step) in report
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.phase_index == phase_idx)
        {
            let duration = step
                .end
                .map(|e| e.signed_duration_since(step.start).num_seconds())
                .unwrap_or(0);
            out.push_str(&format!(
                "- {} **{}** ({}, {}s)",
                step.status.icon(),
                step.name,
                status_label(step.status),
                duration
            ));
            if let Some(detail) = &step.detail {
                out.push_str(&format!(" — {detail}"));
            }
            out.push('\n');
            for item in report.items.iter().filter(|i| i.step_index == step_idx) {
                out.push_str(&format!(
                    "  - [{}] {}",
                    item.status.as_str(),
                    item.name
                ));
                if let Some(detail) = &item.detail {
                    out.push_str(&format!(": {detail}"));
                }
                out.push('\n');
            }
        }
        out.push('\n');
    }

    if !report.confirmations.is_empty() {
        out.push_str("## Confirmations\n\n| Step | Kind | Prompt | Outcome |\n|---|---|---|---|\n");
        for c in &report.confirmations {
            let step_name = c
                .step_index
                .and_then(|i| report.steps.get(i))
                .map(|s| s.name.as_str())
                .unwrap_or("-");
            out.push_str(&format!(
                "| {} | {} | {} | {} |\n",
                step_name,
                confirm_kind_label(c.kind),
                c.prompt,
                c.outcome
            ));
        }
        out.push('\n');
    }

    out.push_str(&format!("---\nLog directory: {}\n", report.output_dir.display()));
    out
}

pub fn to_json(
    report: &Report,
    totals: &Totals,
    mask: &dyn Fn(&str, &str) -> String,
) -> anyhow::Result<String> {
    let mut meta = Map::new();
    for (k, v) in &report.meta {
        meta.insert(k.clone(), Value::String(mask(k, v)));
    }

    let phases: Vec<Value> = report
        .phases
        .iter()
        .map(|p| json!({"name": p.name, "start": p.start.to_rfc3339()}))
        .collect();

    let steps: Vec<Value> = report
        .steps
        .iter()
        .map(|s| {
            json!({
                "phase_index": s.phase_index,
                "name": s.name,
                "status": status_label(s.status),
                "start": s.start.to_rfc3339(),
                "end": s.end.map(|e| e.to_rfc3339()),
                "detail": s.detail,
            })
        })
        .collect();

    let items: Vec<Value> = report
        .items
        .iter()
        .map(|i| {
            json!({
                "step_index": i.step_index,
                "status": i.status.as_str(),
                "name": i.name,
                "detail": i.detail,
            })
        })
        .collect();

    let confirmations: Vec<Value> = report
        .confirmations
        .iter()
        .map(|c| {
            json!({
                "step_index": c.step_index,
                "kind": confirm_kind_label(c.kind),
                "prompt": c.prompt,
                "outcome": c.outcome,
            })
        })
        .collect();

    let doc = json!({
        "title": report.title,
        "session_id": report.session_id,
        "output_dir": report.output_dir.display().to_string(),
        "start_time": report.start_time.to_rfc3339(),
        "status": totals.status,
        "elapsed_secs": totals.elapsed_secs,
        "meta": meta,
        "phases": phases,
        "steps": steps,
        "items": items,
        "metrics": report.metrics,
        "confirmations": confirmations,
    });
    Ok(serde_json::to_string_pretty(&doc)?)
}
