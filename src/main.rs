// Weather Alert v0.1
use axum::{routing::get, Router};
use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

mod config;
mod errors;
mod routes;
mod services;

use config::AppConfig;
use services::delivery_log::DeliveryLog;
use services::scheduler::{CycleSummary, Pipeline, SchedulerState, SharedSchedulerState};

/// Weather Alert OpenAPI specification.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Weather Alert",
        version = "0.1.0",
        description = "Scheduled multi-day weather reports with threshold alerts for one \
            location, delivered over WhatsApp Web. This API exposes the scheduler \
            state and the log of generated reports.",
        license(name = "MIT"),
    ),
    tags(
        (name = "Health", description = "Service health check"),
        (name = "Scheduler", description = "Background report scheduler status"),
        (name = "Logs", description = "Delivery log of generated reports"),
    ),
    paths(
        routes::health::health_check,
        routes::scheduler::get_scheduler_status,
        routes::logs::list_logs,
    ),
    components(
        schemas(
            routes::health::HealthResponse,
            services::scheduler::SchedulerState,
            services::delivery_log::DeliveryLogEntry,
            errors::ErrorResponse,
        )
    )
)]
struct ApiDoc;

#[derive(Parser)]
#[command(name = "weather-alert")]
#[command(about = "Weather forecast reports with alerts, delivered over WhatsApp Web")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and the status API (default)
    Run,

    /// Generate, deliver and log one report, then exit
    Once,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "weather_alert=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::from_env();

    if let Err(e) = config.required() {
        tracing::warn!("{}; reports will fail until this is fixed", e);
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => serve(config).await,
        Commands::Once => run_once(&config).await,
    }
}

/// Manual trigger: one full cycle. Exits with status 1 if the log cannot be written.
async fn run_once(config: &AppConfig) {
    println!("🚀 Manual trigger: fetching weather and sending the WhatsApp report...");

    let pipeline = Pipeline::from_config(config);
    match pipeline.run_cycle().await {
        Ok(summary) => {
            // The report itself is already in the cycle's log output
            let log_path = pipeline.log().path().display().to_string();
            for line in completion_lines(&summary, &log_path) {
                println!("{}", line);
            }
        }
        Err(e) => {
            eprintln!("\n❌ Critical error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Console summary printed after a manual run.
fn completion_lines(summary: &CycleSummary, log_path: &str) -> Vec<String> {
    let mut lines = Vec::new();
    if let Some(len) = summary.log_len {
        lines.push(format!("📝 Logged to {} ({} entries)", log_path, len));
    }
    lines.push(match summary.delivered_by {
        Some(strategy) => format!("\n✅ Process finished, delivered via {}.", strategy),
        None => "\n⚠️ Process finished, but the report was not delivered.".to_string(),
    });
    lines
}

async fn serve(config: AppConfig) {
    // Create shared scheduler state and spawn the background scheduler
    let scheduler_state: SharedSchedulerState = Arc::new(RwLock::new(SchedulerState::new(
        config.report_interval_minutes,
    )));
    tokio::spawn(services::scheduler::run_scheduler(
        Pipeline::from_config(&config),
        scheduler_state.clone(),
    ));

    // CORS: read-only API, restrict methods to GET
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::GET])
        .allow_headers(Any);

    let health_routes = Router::new().route("/api/v1/health", get(routes::health::health_check));

    // Scheduler status uses SharedSchedulerState
    let scheduler_routes = Router::new()
        .route(
            "/api/v1/scheduler/status",
            get(routes::scheduler::get_scheduler_status),
        )
        .with_state(scheduler_state);

    let log_routes = Router::new()
        .route("/api/v1/logs", get(routes::logs::list_logs))
        .with_state(DeliveryLog::new(&config.log_file));

    let app = Router::new()
        .merge(health_routes)
        .merge(scheduler_routes)
        .merge(log_routes)
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("Status API listening on {}", addr);
    tracing::info!(
        "Swagger UI available at http://localhost:{}/swagger-ui/",
        config.port
    );

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind TCP listener");
    axum::serve(listener, app)
        .await
        .expect("Server terminated unexpectedly");
}
