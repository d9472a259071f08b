use anyhow::{bail, Context, Result};
use aws_reaper::orchestrator::{self, PassOptions, DATABASE_TARGET, DEFAULT_PURGE_HORIZON_MINUTES};
use aws_reaper::{handlers, Session};
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "aws-reaper", about = "Terminate stale AWS test resources", version)]
struct Cli {
    /// AWS region to scan
    #[arg(long, env = "CLEANUP_AWS_REGION", default_value = "us-east-1")]
    region: String,

    /// Named AWS profile to use instead of the default credential chain
    #[arg(long)]
    profile: Option<String>,

    /// DynamoDB table holding first-seen timestamps
    #[arg(long, env = "DYNAMODB_TABLE_NAME")]
    table_name: String,

    /// Dry run: report what would be terminated without deleting anything
    #[arg(short, long)]
    check: bool,

    /// Terminate all discovered resources regardless of age
    #[arg(short, long)]
    force: bool,

    /// Restrict the pass to these resource types (repeatable); the
    /// pseudo-target "Database" selects the staleness store purge
    #[arg(long = "target")]
    targets: Vec<String>,

    /// Minutes a staleness store row may live before the purge removes it
    #[arg(long, default_value_t = DEFAULT_PURGE_HORIZON_MINUTES)]
    purge_after: i64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn validate_targets(targets: &[String]) -> Result<()> {
    for target in targets {
        if target.eq_ignore_ascii_case(DATABASE_TARGET) {
            continue;
        }
        if handlers::lookup(target).is_none() {
            let mut valid: Vec<&str> = handlers::all_handler_kinds()
                .iter()
                .map(|k| k.name)
                .collect();
            valid.push(DATABASE_TARGET);
            valid.sort_unstable();
            bail!("unknown target {target:?}, valid targets: {}", valid.join(", "));
        }
    }
    Ok(())
}

/// `chrono` aborts on out-of-range durations, so the flag is validated here
/// rather than converted blindly.
fn purge_horizon(minutes: i64) -> Result<chrono::Duration> {
    if minutes < 0 {
        bail!("--purge-after must be non-negative, got {minutes}");
    }
    chrono::Duration::try_minutes(minutes)
        .with_context(|| format!("--purge-after value {minutes} is out of range"))
}

fn print_error(err: &anyhow::Error) {
    eprintln!("error: {err}");
    for cause in err.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
    if std::env::var_os("RUST_BACKTRACE").is_none() {
        eprintln!("note: set RUST_BACKTRACE=1 for a backtrace");
    }
}

async fn run(cli: Cli) -> Result<()> {
    validate_targets(&cli.targets)?;
    let purge_horizon = purge_horizon(cli.purge_after)?;

    let session = Session::connect(&cli.region, cli.profile.as_deref(), &cli.table_name).await;

    let options = PassOptions {
        check: cli.check,
        force: cli.force,
        targets: cli.targets,
        purge_horizon,
    };

    orchestrator::cleanup(&session, &options).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    if let Err(err) = run(cli).await {
        print_error(&err);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parses_flags() {
        let cli = Cli::parse_from([
            "aws-reaper",
            "--table-name",
            "reaper-seen",
            "--region",
            "us-west-2",
            "-c",
            "--target",
            "S3Bucket",
            "--target",
            "database",
        ]);
        assert_eq!(cli.table_name, "reaper-seen");
        assert_eq!(cli.region, "us-west-2");
        assert!(cli.check);
        assert!(!cli.force);
        assert_eq!(cli.targets, vec!["S3Bucket", "database"]);
        assert_eq!(cli.purge_after, 60);
    }

    #[test]
    fn valid_targets_pass_validation() {
        let targets = vec!["ec2instance".to_string(), "Database".to_string()];
        assert!(validate_targets(&targets).is_ok());
    }

    #[test]
    fn purge_horizon_accepts_sane_values() {
        assert_eq!(purge_horizon(60).unwrap(), chrono::Duration::minutes(60));
        assert_eq!(purge_horizon(0).unwrap(), chrono::Duration::zero());
    }

    #[test]
    fn purge_horizon_rejects_negative_and_out_of_range_values() {
        assert!(purge_horizon(-1).is_err());
        assert!(purge_horizon(i64::MAX).is_err());
    }

    #[test]
    fn unknown_target_is_rejected_with_the_valid_set() {
        let targets = vec!["Lambda".to_string()];
        let err = validate_targets(&targets).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("Lambda"), "{message}");
        assert!(message.contains("Database"), "{message}");
        assert!(message.contains("S3Bucket"), "{message}");
    }
}
