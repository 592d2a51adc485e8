use std::sync::Arc;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

use {
    orac_common::ActorId,
    orac_config::OracConfig,
    orac_context::{AssemblyConfig, ContextEngine, HeuristicTokenizer},
    orac_memory::{DistanceMetric, FixedWidthChunker, embeddings_openai::OpenAiEmbeddingProvider},
    orac_registry::{ContextPolicy, NewLlm},
    orac_sessions::{NewTurn, Role},
};

#[derive(Parser)]
#[command(name = "orac", about = "Orac — conversational context engine")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Actor identity recorded in audit fields.
    #[arg(long, global = true, default_value = "cli")]
    actor: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database schema.
    Init,
    /// LLM registry management.
    Models {
        #[command(subcommand)]
        action: ModelAction,
    },
    /// Register a user.
    Users {
        #[command(subcommand)]
        action: UserAction,
    },
    /// Append a turn to a session (and index it for retrieval).
    Append {
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(short, long)]
        message: String,
        #[arg(long)]
        llm: Option<String>,
        #[arg(long)]
        tokens: Option<i64>,
        /// Skip embedding/indexing of the appended turn.
        #[arg(long, default_value_t = false)]
        no_index: bool,
    },
    /// Print a session's history in order.
    History {
        #[arg(long)]
        session: String,
        #[arg(long)]
        limit: Option<i64>,
    },
    /// Assemble the bounded context for a new message.
    Assemble {
        #[arg(long)]
        llm: String,
        #[arg(long)]
        session: String,
        #[arg(long)]
        user: String,
        #[arg(short, long)]
        message: String,
    },
    /// List sessions with turn counts.
    Sessions,
}

#[derive(Subcommand)]
enum ModelAction {
    Register {
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        model: String,
        /// model, app, hybrid, or external.
        #[arg(long, default_value = "app")]
        policy: String,
        #[arg(long)]
        max_context_tokens: Option<i64>,
        #[arg(long, default_value_t = false)]
        disabled: bool,
    },
    List {
        #[arg(long, default_value_t = false)]
        enabled_only: bool,
    },
    Remove {
        name: String,
    },
}

#[derive(Subcommand)]
enum UserAction {
    Create {
        username: String,
        #[arg(long)]
        display_name: Option<String>,
        #[arg(long)]
        email: Option<String>,
    },
    List,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    if cli.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

async fn build_engine(cfg: &OracConfig) -> anyhow::Result<(sqlx::SqlitePool, ContextEngine)> {
    let pool = orac_common::db::connect(&cfg.db_path).await?;

    let api_key = std::env::var(&cfg.embedding.api_key_env).unwrap_or_default();
    let metric: DistanceMetric = cfg
        .embedding
        .metric
        .parse()
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let provider = OpenAiEmbeddingProvider::new(api_key)
        .with_base_url(cfg.embedding.base_url.clone())
        .with_model(cfg.embedding.model.clone(), cfg.embedding.dimensions)
        .with_metric(metric);

    let engine = ContextEngine::new(
        pool.clone(),
        Arc::new(provider),
        Arc::new(HeuristicTokenizer::default()),
        Box::new(FixedWidthChunker {
            max_chars: cfg.chunking.max_chars,
        }),
        AssemblyConfig {
            top_k: cfg.retrieval.top_k,
            hybrid_headroom: cfg.retrieval.hybrid_headroom,
        },
    );
    Ok((pool, engine))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    let cfg = orac_config::discover_and_load();
    let actor = ActorId(cli.actor.clone());
    let (pool, engine) = build_engine(&cfg).await?;

    match cli.command {
        Commands::Init => {
            ContextEngine::init(&pool).await?;
            info!(db_path = %cfg.db_path, "schema initialized");
            Ok(())
        },
        Commands::Models { action } => handle_models(&engine, action, &actor).await,
        Commands::Users { action } => handle_users(&engine, action, &actor).await,
        Commands::Append {
            session,
            user,
            role,
            message,
            llm,
            tokens,
            no_index,
        } => {
            let role: Role = role.parse()?;
            let user = engine.users().get_user_by_username(&user).await?;
            let llm_id = match llm {
                Some(name) => Some(engine.registry().get(&name).await?.id),
                None => None,
            };
            let new = NewTurn {
                session,
                user_id: user.id,
                role,
                content: serde_json::json!(message),
                llm_id,
                tokens_used: tokens,
                meta: serde_json::Value::Null,
            };
            let turn = if no_index {
                engine.append_turn(new, &actor).await?
            } else {
                engine.record_turn(new, &actor).await?
            };
            println!("{}", serde_json::to_string_pretty(&turn)?);
            Ok(())
        },
        Commands::History { session, limit } => {
            let turns = engine.turns().history(&session, None, limit).await?;
            for turn in turns {
                println!("{}", serde_json::to_string(&turn)?);
            }
            Ok(())
        },
        Commands::Assemble {
            llm,
            session,
            user,
            message,
        } => {
            let user = engine.users().get_user_by_username(&user).await?;
            let new_turn = engine
                .record_turn(
                    NewTurn {
                        session: session.clone(),
                        user_id: user.id,
                        role: Role::User,
                        content: serde_json::json!(message),
                        llm_id: None,
                        tokens_used: None,
                        meta: serde_json::Value::Null,
                    },
                    &actor,
                )
                .await?;

            let ctx = engine.assemble_context(&llm, &session, &new_turn).await?;
            println!("{}", serde_json::to_string_pretty(&ctx)?);
            Ok(())
        },
        Commands::Sessions => {
            for summary in engine.turns().list_sessions().await? {
                println!("{}", serde_json::to_string(&summary)?);
            }
            Ok(())
        },
    }
}

async fn handle_models(
    engine: &ContextEngine,
    action: ModelAction,
    actor: &ActorId,
) -> anyhow::Result<()> {
    match action {
        ModelAction::Register {
            name,
            provider,
            model,
            policy,
            max_context_tokens,
            disabled,
        } => {
            let context_policy: ContextPolicy = policy.parse()?;
            let def = engine
                .registry()
                .register(
                    NewLlm {
                        name,
                        provider,
                        model,
                        context_policy,
                        max_context_tokens,
                        enabled: !disabled,
                        properties: serde_json::Value::Null,
                    },
                    actor,
                )
                .await?;
            println!("{}", serde_json::to_string_pretty(&def)?);
            Ok(())
        },
        ModelAction::List { enabled_only } => {
            for def in engine.registry().list(enabled_only).await? {
                println!("{}", serde_json::to_string(&def)?);
            }
            Ok(())
        },
        ModelAction::Remove { name } => {
            engine.registry().remove(&name, actor).await?;
            info!(%name, "removed llm definition");
            Ok(())
        },
    }
}

async fn handle_users(
    engine: &ContextEngine,
    action: UserAction,
    actor: &ActorId,
) -> anyhow::Result<()> {
    match action {
        UserAction::Create {
            username,
            display_name,
            email,
        } => {
            let display = display_name.unwrap_or_else(|| username.clone());
            let user = engine
                .users()
                .create_user(&username, &display, email.as_deref(), actor)
                .await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
            Ok(())
        },
        UserAction::List => {
            for user in engine.users().list_users().await? {
                println!("{}", serde_json::to_string(&user)?);
            }
            Ok(())
        },
    }
}
