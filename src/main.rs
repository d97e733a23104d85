use std::sync::{Arc, Mutex, PoisonError};

use burn::tensor::backend::Backend;
use chessmind::rl::{BackgroundTrainer, EpisodeStore, LossCallback, PerfLog, Trainer};
use chessmind::server::ChessTrainerService;
use chessmind::{Config, Session, TrainingBackend};
use dotenv::dotenv;
use tonic::transport::Server;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("chessmind=debug,info"));

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    init_logging()?;

    let config = Config::from_env();
    tracing::info!("Configuration: {:?}", config);

    let device = <TrainingBackend as Backend>::Device::default();
    let store = Arc::new(EpisodeStore::new(config.replay_capacity));
    let trainer = Arc::new(Trainer::<TrainingBackend>::new(
        device,
        Arc::clone(&store),
        config.train_config(),
    ));

    let checkpoint = config.checkpoint_path();
    if trainer.load_or_keep(&checkpoint) {
        tracing::info!("Loaded checkpoint {}", checkpoint.display());
    } else {
        tracing::info!("Starting from fresh weights");
    }

    let perf = Arc::new(Mutex::new(PerfLog::open(config.perf_log_path())));

    let background = BackgroundTrainer::new(Arc::clone(&trainer), config.loop_config());
    let callback_perf = Arc::clone(&perf);
    let on_loss: LossCallback = Box::new(move |loss| {
        callback_perf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record_training(Some(loss));
        Ok(())
    });
    background.start(Some(on_loss));

    let session = Session::new(Arc::clone(&trainer), perf, config.session_config());
    let service = ChessTrainerService::new(Arc::new(Mutex::new(session)));

    tracing::info!("Listening on {}", config.addr);
    let served = Server::builder()
        .add_service(service.into_server())
        .serve_with_shutdown(config.addr, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::warn!("Failed to listen for shutdown signal: {}", err);
            }
            tracing::info!("Shutting down");
        })
        .await;

    background.stop();
    match trainer.save(&checkpoint) {
        Ok(path) => tracing::info!("Saved final checkpoint {}", path.display()),
        Err(err) => tracing::warn!("Final checkpoint failed: {}", err),
    }

    served?;
    Ok(())
}
