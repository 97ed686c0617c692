use anyhow::{Context, Result};
use clap::Parser;
use shared::{
    BatchReport, Config, DryRunMailer, MailSender, Outcome, PreferenceStore, Services, SmtpMailer,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "daily-send")]
#[command(about = "Curate and email today's newsletter to every subscriber")]
struct Args {
    /// Print newsletters instead of sending them
    #[arg(long)]
    dry_run: bool,

    /// Only send to this subscriber
    #[arg(long, value_name = "EMAIL")]
    only: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::from_env()?;

    let mailer: Box<dyn MailSender> = if args.dry_run {
        info!("Dry run: newsletters will be printed, not sent");
        Box::new(DryRunMailer)
    } else {
        Box::new(SmtpMailer::new(config.require_smtp()?)?)
    };

    let services = Services::from_config(&config)?;
    let dispatcher = services.dispatcher(mailer.as_ref());

    let report = match args.only {
        Some(email) => {
            let user = services
                .store
                .preferences()
                .get(&email)
                .await
                .context("Failed to load subscriber")?
                .ok_or_else(|| anyhow::anyhow!("No preferences stored for {}", email))?;
            dispatcher.run_for(std::slice::from_ref(&user)).await
        }
        None => match dispatcher.run().await {
            Ok(report) => report,
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => {
                eprintln!("Error loading subscribers: {}", e);
                BatchReport::default()
            }
        },
    };

    print_summary(&report);

    Ok(())
}

fn print_summary(report: &BatchReport) {
    println!(
        "\n✅ Done: {} sent, {} skipped, {} failed",
        report.sent(),
        report.skipped(),
        report.failed()
    );
    for outcome in &report.outcomes {
        if let Outcome::Skipped(reason) = &outcome.outcome {
            println!("  - skipped {} ({})", display_email(&outcome.email), reason);
        }
    }
}

fn display_email(email: &str) -> &str {
    if email.trim().is_empty() {
        "<no email>"
    } else {
        email
    }
}
