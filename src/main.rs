use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::time::Duration;
use tracing::{error, info};

use s3_doctor::config::Config;
use s3_doctor::error::{AdapterError, DoctorError};
use s3_doctor::logging::{init_logging, StructuredLogger};
use s3_doctor::report::{BucketDiagnosticReport, CheckStatus};
use s3_doctor::service::DoctorService;

#[derive(Parser)]
#[command(name = "s3-doctor")]
#[command(about = "S3 bucket security diagnostics with scoring, auto-remediation and AI analysis")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<String>,

    /// AWS profile to use
    #[arg(short, long, global = true)]
    profile: Option<String>,

    /// AWS region
    #[arg(long, global = true)]
    region: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
    Yaml,
}

#[derive(Subcommand)]
enum Commands {
    /// Check connectivity to S3 and AI availability
    Health,

    /// Verify AWS credentials
    Credentials,

    /// List buckets visible to the credentials
    List,

    /// Diagnose one bucket
    Diagnose {
        bucket: String,

        /// Attach AI root-cause analysis
        #[arg(long)]
        ai: bool,
    },

    /// Apply automatic fixes and compare before/after scores
    Fix {
        bucket: String,

        /// Show the planned fixes without applying them
        #[arg(long)]
        dry_run: bool,
    },

    /// Diagnose every bucket in the account
    ScanAll,

    /// Describe a problem and get a targeted diagnosis
    Troubleshoot {
        bucket: String,

        /// Free-text description of the issue
        issue: String,
    },

    /// Generate a least-privilege bucket policy for a use case
    Policy {
        bucket: String,

        /// Intended use of the bucket
        use_case: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Validate current configuration
    Validate,

    /// Show current configuration
    Show,

    /// Generate example configuration file
    Generate {
        /// Output file path (defaults to standard config directory)
        #[arg(short, long)]
        output: Option<String>,
    },

    /// Show environment variable help
    EnvHelp,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match Config::load_unvalidated(cli.config.as_deref()).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    if cli.verbose {
        config.logging.level = "debug".to_string();
        config.logging.performance_tracing = true;
    }
    if let Some(profile) = cli.profile.clone() {
        config.aws.profile = Some(profile);
    }
    if let Some(region) = cli.region.clone() {
        config.aws.region = region;
    }

    // `config validate` reports problems itself
    let validate_only = matches!(
        cli.command,
        Commands::Config {
            action: ConfigCommands::Validate
        }
    );
    if !validate_only {
        if let Err(e) = config.validate() {
            eprintln!("❌ Failed to load configuration: {}", e);
            return Err(DoctorError::from(e).into());
        }
    }

    // Held until exit so buffered file logs are flushed
    let _log_guard = match init_logging(&config.logging) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return Err(anyhow::anyhow!("Failed to initialize logging: {}", e));
        }
    };

    info!("Starting S3 Doctor v{}", env!("CARGO_PKG_VERSION"));

    let result = match cli.command {
        Commands::Config { action } => handle_config(action, &config).await,
        command => {
            let service = DoctorService::from_config(&config).await;
            run_command(command, &service, cli.format).await
        }
    };

    if let Err(e) = result {
        let doctor_error = match e.downcast::<AdapterError>() {
            Ok(adapter_err) => DoctorError::from(adapter_err),
            Err(other) => DoctorError::from(other),
        };
        StructuredLogger::log_error(&doctor_error, "main", "command_execution");
        eprintln!("❌ {}", doctor_error.user_message());
        return Err(doctor_error.into());
    }

    Ok(())
}

async fn run_command(command: Commands, service: &DoctorService, format: OutputFormat) -> Result<()> {
    match command {
        Commands::Health => handle_health(service, format).await,
        Commands::Credentials => handle_credentials(service, format).await,
        Commands::List => handle_list(service, format).await,
        Commands::Diagnose { bucket, ai } => handle_diagnose(service, &bucket, ai, format).await,
        Commands::Fix { bucket, dry_run } => handle_fix(service, &bucket, dry_run, format).await,
        Commands::ScanAll => handle_scan_all(service, format).await,
        Commands::Troubleshoot { bucket, issue } => handle_troubleshoot(service, &bucket, &issue, format).await,
        Commands::Policy { bucket, use_case } => handle_policy(service, &bucket, &use_case, format).await,
        Commands::Config { .. } => Ok(()),
    }
}

/// Print a payload as JSON or YAML; returns false for text output
fn emit<T: Serialize>(format: OutputFormat, payload: &T) -> Result<bool> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(payload)?);
            Ok(true)
        }
        OutputFormat::Yaml => {
            print!("{}", serde_yaml::to_string(payload)?);
            Ok(true)
        }
        OutputFormat::Text => Ok(false),
    }
}

fn status_icon(status: CheckStatus) -> &'static str {
    match status {
        CheckStatus::Pass => "✅",
        CheckStatus::Fail => "❌",
        CheckStatus::Warn => "⚠️ ",
        CheckStatus::Error => "💥",
    }
}

fn print_report(report: &BucketDiagnosticReport) {
    println!("🪣 Bucket: {}", report.bucket_name);
    if let Some(region) = &report.region {
        println!("   Region: {}", region);
    }
    println!("   Score: {}/100 ({})", report.score, report.overall_health);
    println!(
        "   Passed: {} | Failed: {} | Warnings: {} | Errors: {}",
        report.counts.passed, report.counts.failed, report.counts.warnings, report.counts.errors
    );
    println!();

    for result in &report.results {
        println!(
            "  {} {:<22} [{}] {}",
            status_icon(result.status),
            result.check_name,
            result.severity.as_str(),
            result.detail
        );
        if result.is_finding() && !result.recommendation.is_empty() {
            println!("     💡 {}", result.recommendation);
        }
    }

    if let Some(summary) = &report.ai_summary {
        println!();
        println!("🤖 AI Summary: {}", summary);
    }
    if let Some(analysis) = &report.ai_analysis {
        println!();
        println!("🤖 AI Analysis:");
        println!("{}", analysis);
    }
    if let Some(ai_error) = &report.ai_error {
        println!();
        println!("⚠️  {}", ai_error);
    }
}

async fn handle_health(service: &DoctorService, format: OutputFormat) -> Result<()> {
    let status = service.health().await;
    if emit(format, &status)? {
        return Ok(());
    }

    println!("🏥 Health Check:");
    if status.connected {
        println!("✅ Connected to S3");
    } else {
        println!("❌ Cannot reach S3: {}", status.error.as_deref().unwrap_or("unknown error"));
    }
    println!(
        "{} AI analysis {}",
        if status.ai_available { "✅" } else { "⚠️ " },
        if status.ai_available { "available" } else { "not configured" }
    );
    Ok(())
}

async fn handle_credentials(service: &DoctorService, format: OutputFormat) -> Result<()> {
    let status = service.credentials().await;
    if emit(format, &status)? {
        return Ok(());
    }

    println!("🔐 AWS Credentials:");
    if status.valid {
        println!("✅ Credentials are valid");
        println!("   Account: {}", status.account.as_deref().unwrap_or("-"));
        println!("   ARN: {}", status.arn.as_deref().unwrap_or("-"));
    } else {
        println!("❌ Credentials are not valid");
        println!("   {}", status.error.as_deref().unwrap_or("unknown error"));
    }
    Ok(())
}

async fn handle_list(service: &DoctorService, format: OutputFormat) -> Result<()> {
    let list = service.list_buckets().await?;
    if emit(format, &list)? {
        return Ok(());
    }

    println!("🪣 Buckets ({}):", list.count);
    for bucket in &list.buckets {
        println!("  • {}", bucket);
    }
    Ok(())
}

async fn handle_diagnose(service: &DoctorService, bucket: &str, ai: bool, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Text {
        println!("🔍 Diagnosing bucket {}...", bucket);
        println!();
    }
    let report = service.diagnose(bucket, ai).await?;
    if emit(format, &report)? {
        return Ok(());
    }
    print_report(&report);
    Ok(())
}

async fn handle_fix(service: &DoctorService, bucket: &str, dry_run: bool, format: OutputFormat) -> Result<()> {
    if dry_run {
        let plan = service.plan_fixes(bucket).await?;
        if emit(format, &plan)? {
            return Ok(());
        }
        if plan.is_empty() {
            println!("✅ No automatic fixes needed for {}", bucket);
            return Ok(());
        }
        println!("📝 Planned fixes for {} (dry run):", bucket);
        for action in &plan {
            println!("  🔧 {}: {}", action.check_name, action.description);
            println!("     $ {}", action.command);
        }
        return Ok(());
    }

    if format == OutputFormat::Text {
        println!("🔧 Running automatic fixes for {}...", bucket);
        println!();
    }
    let result = service.remediate(bucket).await?;
    if emit(format, &result)? {
        return Ok(());
    }

    if result.fixes_applied.is_empty() {
        println!("✅ No automatic fixes needed");
    }
    for fix in &result.fixes_applied {
        if fix.success {
            println!("  ✅ {}: {}", fix.check_name, fix.message.as_deref().unwrap_or("fixed"));
        } else {
            println!("  ❌ {}: {}", fix.check_name, fix.error.as_deref().unwrap_or("failed"));
        }
    }
    println!();
    if let Some(verification_error) = &result.verification_error {
        println!("⚠️  Fixes were applied but the bucket could not be re-diagnosed: {}", verification_error);
        println!("   Showing the pre-fix report; run `s3-doctor diagnose {}` to confirm.", bucket);
        println!();
    }
    println!(
        "📊 Score: {} → {} ({:+})",
        result.before_score, result.after_score, result.improvement
    );
    println!();
    print_report(&result.report);

    if let Some(recommendations) = &result.ai_recommendations {
        println!();
        println!("🤖 Next steps:");
        println!("{}", recommendations);
    }
    Ok(())
}

async fn handle_scan_all(service: &DoctorService, format: OutputFormat) -> Result<()> {
    if format == OutputFormat::Text {
        println!("🔍 Scanning all buckets...");
        println!();
    }
    let summary = service.scan_all().await?;
    if emit(format, &summary)? {
        return Ok(());
    }

    println!("📊 Fleet Summary (scan {}):", summary.scan_id);
    println!("   Buckets: {}", summary.total);
    println!("   Average Score: {}/100", summary.average_score);
    println!("   Critical: {} | Good: {} | Errors: {}", summary.critical_count, summary.good_count, summary.error_count);
    println!(
        "   Elapsed: {}",
        humantime::format_duration(Duration::from_millis(summary.elapsed_ms))
    );
    println!();

    for entry in summary.sorted_by_score() {
        match &entry.error {
            Some(err) => println!("  💥 {:<40} {:>3} {}  ({})", entry.bucket, entry.score, entry.health, err),
            None => println!(
                "  {} {:<40} {:>3} {}",
                if entry.failed > 0 { "❌" } else if entry.warnings > 0 { "⚠️ " } else { "✅" },
                entry.bucket,
                entry.score,
                entry.health
            ),
        }
    }
    Ok(())
}

async fn handle_troubleshoot(service: &DoctorService, bucket: &str, issue: &str, format: OutputFormat) -> Result<()> {
    let answer = service.troubleshoot(bucket, issue).await;
    if emit(format, &answer)? {
        return Ok(());
    }

    match (&answer.response, &answer.error) {
        (Some(response), _) => {
            println!("🤖 Troubleshooting {}:", bucket);
            println!();
            println!("{}", response);
            Ok(())
        }
        (None, error) => {
            let message = error.as_deref().unwrap_or("no response");
            println!("❌ Troubleshooting failed: {}", message);
            Err(anyhow::anyhow!("Troubleshooting failed: {}", message))
        }
    }
}

async fn handle_policy(service: &DoctorService, bucket: &str, use_case: &str, format: OutputFormat) -> Result<()> {
    let answer = service.recommend_policy(bucket, use_case).await;
    if emit(format, &answer)? {
        return Ok(());
    }

    match (&answer.response, &answer.error) {
        (Some(policy), _) => {
            println!("📜 Recommended policy for {}:", bucket);
            println!();
            println!("{}", policy);
            Ok(())
        }
        (None, error) => {
            let message = error.as_deref().unwrap_or("no response");
            println!("❌ Policy generation failed: {}", message);
            Err(anyhow::anyhow!("Policy generation failed: {}", message))
        }
    }
}

async fn handle_config(action: ConfigCommands, config: &Config) -> Result<()> {
    match action {
        ConfigCommands::Validate => {
            info!("Validating configuration");
            println!("⚙️  Configuration Validation:");

            match config.validate() {
                Ok(_) => {
                    println!("✅ Configuration is valid");
                    config.print_summary();
                }
                Err(e) => {
                    error!("Configuration validation failed: {}", e);
                    println!("❌ Configuration validation failed:");
                    println!("   {}", e);
                    return Err(e.into());
                }
            }
        }

        ConfigCommands::Show => {
            println!("⚙️  Current Configuration:");
            println!();

            println!("🔐 AWS Settings:");
            println!("  Region: {}", config.aws.region);
            println!("  Profile: {:?}", config.aws.profile);
            println!("  Operation Timeout: {}s", config.aws.operation_timeout_secs);
            println!("  Max Attempts: {}", config.aws.max_attempts);
            println!();

            println!("🔍 Scanning:");
            println!("  Max Concurrency: {}", config.scan.max_concurrency);
            println!("  Adapter Timeout: {}s", config.scan.adapter_timeout_secs);
            println!("  Average Policy: {:?}", config.scan.average_policy);
            println!();

            println!("📊 Scoring:");
            println!(
                "  Weights: CRITICAL {} / HIGH {} / MEDIUM {} / LOW {}",
                config.scoring.weights.critical,
                config.scoring.weights.high,
                config.scoring.weights.medium,
                config.scoring.weights.low
            );
            println!("  Error Penalty: {}", config.scoring.error_penalty);
            println!(
                "  Thresholds: EXCELLENT ≥{} / GOOD ≥{} / POOR ≥{}",
                config.scoring.thresholds.excellent, config.scoring.thresholds.good, config.scoring.thresholds.poor
            );
            println!();

            println!("🤖 AI Analysis:");
            println!("  Enabled: {}", config.ai.enabled);
            println!("  Endpoint: {}", config.ai.endpoint);
            println!("  Model: {}", config.ai.model);
            println!("  API Key Variable: {}", config.ai.api_key_env);
            println!("  Timeout: {}s", config.ai.timeout_secs);
            println!();

            println!("📝 Logging:");
            println!("  Level: {}", config.logging.level);
            println!("  File Logging: {}", config.logging.file_enabled);
            println!("  Log Directory: {:?}", config.logging.log_dir);
            println!("  JSON Format: {}", config.logging.json_format);
        }

        ConfigCommands::Generate { output } => {
            let config_path = match output {
                Some(path) => std::path::PathBuf::from(path),
                None => Config::default_config_path()?,
            };

            info!("Generating example configuration file: {:?}", config_path);
            println!("📝 Generating example configuration file...");

            match Config::default().save(&config_path).await {
                Ok(_) => {
                    println!("✅ Configuration file generated: {:?}", config_path);
                    println!("💡 Edit this file to customize your settings");
                }
                Err(e) => {
                    error!("Failed to generate configuration file: {}", e);
                    println!("❌ Failed to generate configuration file: {}", e);
                    return Err(e);
                }
            }
        }

        ConfigCommands::EnvHelp => {
            println!("🌍 Environment Variable Configuration:");
            println!();
            println!("Environment variables take precedence over configuration file values.");
            println!();

            for (var_name, description) in Config::get_env_variables_help() {
                println!("  {} - {}", var_name, description);
            }

            println!();
            println!("Example Usage:");
            println!("  export S3_DOCTOR_AWS_REGION=eu-west-1");
            println!("  export S3_DOCTOR_MAX_CONCURRENCY=20");
            println!("  export S3_DOCTOR_LOG_LEVEL=debug");
        }
    }

    Ok(())
}
