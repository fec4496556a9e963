use anyhow::Result;
use clap::Parser;
use culturec::algorithms::SweepControl;
use culturec::services::training::TrainOptions;
use culturec::{init_tracing, AppState, Config, ItemType};
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fits the topic model and rebuilds similarity edges", long_about = None)]
struct Args {
    /// events or products
    #[arg(short, long)]
    item_type: String,

    /// Overrides the configured topic count
    #[arg(short, long)]
    topics: Option<usize>,

    /// Reuse the latest saved model instead of refitting
    #[arg(long)]
    refresh: bool,

    #[arg(short, long, default_value = "config/default.toml")]
    config: String,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Top words printed per topic after training
    #[arg(long, default_value_t = 8)]
    top_words: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    std::env::set_var("RUST_LOG", &args.log_level);
    init_tracing();

    let item_type: ItemType = args.item_type.parse()?;
    let config = Config::load_or_default(&args.config)?;
    info!("Training configuration loaded: {:?}", config.topic_model);

    let state = AppState::new(config).await?;
    let trainer = state.training_service.trainer();

    let control = Arc::new(SweepControl::new());
    let outcome = if args.refresh {
        trainer.refresh_similarities(item_type, control).await?
    } else {
        trainer
            .train_with(item_type, &TrainOptions { n_topics: args.topics }, control)
            .await?
    };

    info!(
        item_type = %outcome.item_type,
        trained = outcome.trained_count,
        version_id = outcome.latest_version_id,
        topics = outcome.n_topics,
        inserted = outcome.edges_inserted,
        updated = outcome.edges_updated,
        purged = outcome.edges_purged,
        "Training complete"
    );

    if let Some(trained) = trainer.latest_model(item_type).await? {
        for (topic, words) in trained.model.top_words(&trained.dictionary, args.top_words).iter().enumerate() {
            let words: Vec<String> = words
                .iter()
                .map(|(word, probability)| format!("{}({:.3})", word, probability))
                .collect();
            info!("Topic {}: {}", topic, words.join(" "));
        }
    }

    Ok(())
}
