//! `pcaf`: ingest loan portfolios into the document store and query them.

mod app;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pcaf_pipeline::{
    Instrument, RunOptions, UploadSearchOptions, UploadService, generate_portfolio_insights,
    loan_data_analytics,
};
use pcaf_rag::SearchOptions;
use serde::Serialize;
use serde_json::json;

use crate::app::App;

#[derive(Parser)]
#[command(name = "pcaf", version, about = "Financed-emissions document ingestion and retrieval")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Read the portfolio from a JSON snapshot instead of the backend API
    #[arg(long, global = true, value_name = "FILE")]
    portfolio: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the ETL pipeline once
    Run {
        /// Clear destination collections before storing
        #[arg(long)]
        full_refresh: bool,

        /// Cap the number of individual loan documents
        #[arg(long, value_name = "N")]
        max_loans: Option<usize>,

        /// Also build client-data documents
        #[arg(long)]
        client_documents: bool,
    },
    /// Ingest a CSV or JSON loan file
    Upload {
        file: PathBuf,

        /// auto_loans, commercial_real_estate or project_finance
        #[arg(long)]
        instrument: Instrument,

        #[arg(long)]
        upload_id: Option<String>,
    },
    /// Semantic search across stored documents
    Search {
        query: String,

        #[arg(long)]
        collection: Option<String>,

        #[arg(long, default_value_t = 10)]
        limit: usize,

        #[arg(long, default_value_t = 0.3)]
        min_similarity: f32,

        /// Search uploaded loans only and annotate matches
        #[arg(long)]
        uploads: bool,
    },
    /// Uploaded-loan analytics and portfolio insights
    Analytics {
        #[arg(long)]
        upload_id: Option<String>,
    },
    /// Store health, document counts and run metrics
    Status,
    /// Data-quality assessment of the portfolio
    Assess,
    /// Initialize and run a capped full refresh
    QuickStart,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    if cli.json_logs {
        pcaf_telemetry::init_json_telemetry("pcaf")?;
    } else {
        pcaf_telemetry::init_telemetry("pcaf")?;
    }

    let app = App::from_env()?;
    let portfolio = cli.portfolio.as_deref();

    match cli.command {
        Commands::Run { full_refresh, max_loans, client_documents } => {
            let mut options = RunOptions { full_refresh, ..RunOptions::default() };
            if let Some(max) = max_loans {
                options = options.with_max_loans(max);
            }
            if client_documents {
                options = options.with_client_documents(true);
            }
            let report = app.pipeline(portfolio).await?.run(options).await?;
            print_json(&report)
        }
        Commands::Upload { file, instrument, upload_id } => {
            let content = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let file_name =
                file.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
            let service = UploadService::new(app.engine.clone());
            let result = service.ingest_file(&file_name, &content, instrument, upload_id).await?;
            print_json(&result)
        }
        Commands::Search { query, collection, limit, min_similarity, uploads } => {
            if uploads {
                let options = UploadSearchOptions { limit, ..UploadSearchOptions::default() };
                let matches = UploadService::new(app.engine.clone())
                    .search_uploaded_loans(&query, &options)
                    .await?;
                return print_json(&matches);
            }
            let mut builder = SearchOptions::builder().limit(limit).min_similarity(min_similarity);
            if let Some(collection) = collection {
                builder = builder.collection(collection);
            }
            let results = app.engine.search(&query, &builder.build()?).await?;
            print_json(&results)
        }
        Commands::Analytics { upload_id } => {
            let analytics = loan_data_analytics(&app.engine, upload_id.as_deref()).await?;
            let insights = generate_portfolio_insights(&app.engine, upload_id.as_deref()).await?;
            print_json(&json!({ "analytics": analytics, "insights": insights }))
        }
        Commands::Status => {
            let orchestrator = app.orchestrator(portfolio).await?;
            let status = orchestrator.system_status().await;
            let health = orchestrator.health_metrics();
            print_json(&json!({ "system": status, "health": health }))
        }
        Commands::Assess => {
            let report = app.orchestrator(portfolio).await?.assess_data_quality().await?;
            print_json(&report)
        }
        Commands::QuickStart => {
            let report = app.orchestrator(portfolio).await?.quick_start().await;
            print_json(&report)
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn upload_parses_instrument() {
        let cli =
            Cli::parse_from(["pcaf", "upload", "loans.csv", "--instrument", "project_finance"]);
        match cli.command {
            Commands::Upload { instrument, upload_id, .. } => {
                assert_eq!(instrument, Instrument::ProjectFinance);
                assert!(upload_id.is_none());
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn unknown_instrument_is_rejected() {
        let parsed = Cli::try_parse_from(["pcaf", "upload", "x.csv", "--instrument", "mortgages"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn global_portfolio_flag_follows_subcommand() {
        let cli = Cli::parse_from([
            "pcaf",
            "run",
            "--full-refresh",
            "--max-loans",
            "25",
            "--portfolio",
            "p.json",
        ]);
        assert_eq!(cli.portfolio, Some(PathBuf::from("p.json")));
        assert!(matches!(
            cli.command,
            Commands::Run { full_refresh: true, max_loans: Some(25), .. }
        ));
    }

    #[test]
    fn search_defaults() {
        let cli = Cli::parse_from(["pcaf", "search", "high emission vehicles"]);
        let Commands::Search { limit, min_similarity, collection, uploads, .. } = cli.command else {
            panic!("expected search");
        };
        assert_eq!(limit, 10);
        assert_eq!(min_similarity, 0.3);
        assert!(collection.is_none());
        assert!(!uploads);
    }
}
