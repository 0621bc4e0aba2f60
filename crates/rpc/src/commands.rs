//! CLI commands

use kycaml_core::{DocumentType, SubjectId, SubmissionId};
use kycaml_service::{RejectRequest, SubmitRequest};
use serde::Serialize;

use crate::context::AppContext;

fn print_json(value: &impl Serialize) -> Result<(), anyhow::Error> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Submit a document and push the decision upstream once
pub async fn submit(
    ctx: &AppContext,
    subject_id: &str,
    document_type: DocumentType,
    document_reference: &str,
    jurisdiction: Option<String>,
) -> Result<(), anyhow::Error> {
    let mut request = SubmitRequest::new(subject_id, document_type, document_reference);
    if let Some(jurisdiction) = jurisdiction {
        request = request.with_jurisdiction(jurisdiction);
    }

    let response = ctx.service.submit(request).await?;
    println!(
        "✅ Submission {} for {} → {}",
        response.submission_id, response.subject_id, response.state
    );
    print_json(&response)?;

    // First attempt now; retries are left to `kycaml run`
    let report = ctx.scheduler.run_once().await?;
    if report.acked > 0 {
        println!("✅ Identity record updated");
    } else {
        println!("⏳ Cascade pending (retried: {}, failed: {})", report.retried, report.failed);
    }
    Ok(())
}

/// Re-evaluate a submission left under review
pub async fn review(ctx: &AppContext, submission_id: &str) -> Result<(), anyhow::Error> {
    let response = ctx.service.review(&SubmissionId::from(submission_id)).await?;
    println!("✅ Submission {} → {}", response.submission_id, response.state);
    print_json(&response)
}

pub async fn status(ctx: &AppContext, subject_id: &str) -> Result<(), anyhow::Error> {
    let report = ctx.service.get_status(&SubjectId::from(subject_id)).await?;
    if report.divergence {
        println!("❌ Local decision not reflected upstream; reconcile and requeue");
    }
    print_json(&report)
}

pub fn aml(ctx: &AppContext, subject_id: &str) -> Result<(), anyhow::Error> {
    let snapshot = ctx.service.check_aml(&SubjectId::from(subject_id))?;
    print_json(&snapshot)
}

pub async fn reject(ctx: &AppContext, subject_id: &str, reason: &str) -> Result<(), anyhow::Error> {
    let response = ctx
        .service
        .reject(RejectRequest::new(subject_id, reason))
        .await?;
    println!("✅ Submission {} rejected", response.submission_id);
    ctx.scheduler.run_once().await?;
    Ok(())
}

pub async fn requeue(ctx: &AppContext, submission_id: &str) -> Result<(), anyhow::Error> {
    let task = ctx.service.requeue(&SubmissionId::from(submission_id))?;
    println!("✅ Cascade for {} requeued", task.submission_id);
    ctx.scheduler.run_once().await?;
    print_json(&ctx.store.task_for(&task.submission_id)?)
}

pub async fn health(ctx: &AppContext) -> Result<(), anyhow::Error> {
    // A single round cannot flip status past the debounce, so probe enough
    // rounds to reflect the current reachability
    let rounds = ctx
        .config
        .health
        .failure_threshold
        .max(ctx.config.health.recovery_threshold);
    for _ in 0..rounds {
        ctx.health.probe_once().await;
    }
    print_json(&ctx.service.health()?)
}

/// Run the cascade scheduler and health monitor until Ctrl-C
pub async fn run(ctx: &AppContext) -> Result<(), anyhow::Error> {
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let signal = |mut rx: tokio::sync::watch::Receiver<bool>| async move {
        let _ = rx.wait_for(|stop| *stop).await;
    };

    println!("🚀 Cascade scheduler running (Ctrl-C to stop)");
    let ctrl_c = async {
        let result = tokio::signal::ctrl_c().await;
        let _ = shutdown_tx.send(true);
        result
    };

    let (signal_result, _, _) = tokio::join!(
        ctrl_c,
        ctx.scheduler.run_until(signal(shutdown_rx.clone())),
        ctx.health.run_until(signal(shutdown_rx)),
    );
    signal_result?;

    println!("👋 Stopped");
    Ok(())
}
