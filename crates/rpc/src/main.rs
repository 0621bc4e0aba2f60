//! KycAml CLI - Main entry point

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use kycaml_core::DocumentType;
use kycaml_rpc::{commands, AppContext, KycConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kycaml")]
#[command(about = "KycAml - KYC/AML compliance status with upstream propagation", long_about = None)]
struct Cli {
    /// Data directory path
    #[arg(short, long, default_value = "./data")]
    data: PathBuf,

    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a document for verification
    Submit {
        /// Subject (identity record) ID
        subject: String,
        /// passport, national_id, drivers_license, residence_permit, utility_bill, other
        document_type: DocumentType,
        /// Opaque document locator
        reference: String,
        /// ISO country code of the issuing authority
        #[arg(long)]
        jurisdiction: Option<String>,
    },

    /// Re-evaluate a submission left under review
    Review {
        submission_id: String,
    },

    /// Show merged local/upstream status for a subject
    Status {
        subject: String,
    },

    /// Show the latest AML risk snapshot for a subject
    Aml {
        subject: String,
    },

    /// Reject the subject's active submission
    Reject {
        subject: String,
        /// Reason recorded with the decision
        #[arg(long, default_value = "rejected by operator")]
        reason: String,
    },

    /// Requeue a FAILED_PERMANENT cascade after reconciliation
    Requeue {
        submission_id: String,
    },

    /// Probe collaborators and print the health report
    Health,

    /// Run the cascade scheduler and health monitor until Ctrl-C
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    let config = KycConfig::load(cli.config.as_deref())?;
    let ctx = AppContext::new(&cli.data, config)?;

    match cli.command {
        Commands::Submit {
            subject,
            document_type,
            reference,
            jurisdiction,
        } => {
            commands::submit(&ctx, &subject, document_type, &reference, jurisdiction).await?;
        }

        Commands::Review { submission_id } => {
            commands::review(&ctx, &submission_id).await?;
        }

        Commands::Status { subject } => {
            commands::status(&ctx, &subject).await?;
        }

        Commands::Aml { subject } => {
            commands::aml(&ctx, &subject)?;
        }

        Commands::Reject { subject, reason } => {
            commands::reject(&ctx, &subject, &reason).await?;
        }

        Commands::Requeue { submission_id } => {
            commands::requeue(&ctx, &submission_id).await?;
        }

        Commands::Health => {
            commands::health(&ctx).await?;
        }

        Commands::Run => {
            commands::run(&ctx).await?;
        }
    }

    Ok(())
}
