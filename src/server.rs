use std::sync::{Arc, Mutex, PoisonError};

use burn::tensor::backend::AutodiffBackend;
use tonic::{Request, Response, Status};

use crate::proto::chess_trainer_server::{ChessTrainer, ChessTrainerServer};
use crate::proto::{
    self, Empty, FenReply, MoveRequest, MovesReply, PerformanceReply, ResultCounts,
};
use crate::rl::metrics::TrainingStats;
use crate::session::Session;

/// gRPC front of a single shared session
pub struct ChessTrainerService<B: AutodiffBackend> {
    session: Arc<Mutex<Session<B>>>,
}

impl<B: AutodiffBackend> ChessTrainerService<B> {
    pub fn new(session: Arc<Mutex<Session<B>>>) -> Self {
        Self { session }
    }

    pub fn into_server(self) -> ChessTrainerServer<Self> {
        ChessTrainerServer::new(self)
    }

    /// Run `f` on the session off the async executor; inference and the
    /// end-of-game train step are CPU bound.
    async fn with_session<T, F>(&self, f: F) -> Result<T, Status>
    where
        F: FnOnce(&mut Session<B>) -> T + Send + 'static,
        T: Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || {
            let mut session = session.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut session)
        })
        .await
        .map_err(|err| Status::internal(format!("session task failed: {}", err)))
    }
}

#[tonic::async_trait]
impl<B: AutodiffBackend> ChessTrainer for ChessTrainerService<B> {
    async fn get_board_fen(&self, _request: Request<Empty>) -> Result<Response<FenReply>, Status> {
        let fen = self.with_session(|session| session.fen()).await?;
        Ok(Response::new(FenReply { fen }))
    }

    async fn get_moves(&self, _request: Request<Empty>) -> Result<Response<MovesReply>, Status> {
        let moves = self.with_session(|session| session.move_history()).await?;
        Ok(Response::new(MovesReply { moves }))
    }

    async fn reset_game(&self, _request: Request<Empty>) -> Result<Response<FenReply>, Status> {
        let fen = self.with_session(|session| session.reset()).await?;
        Ok(Response::new(FenReply { fen }))
    }

    async fn make_human_move(
        &self,
        request: Request<MoveRequest>,
    ) -> Result<Response<proto::MoveReply>, Status> {
        let notation = request.into_inner().notation;
        tracing::debug!("Human move request {:?}", notation);
        let reply = self
            .with_session(move |session| session.apply_human_move(&notation).to_string())
            .await?;
        Ok(Response::new(proto::MoveReply { reply }))
    }

    async fn ai_move(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<proto::MoveReply>, Status> {
        let reply = self
            .with_session(|session| session.request_ai_move().to_string())
            .await?;
        Ok(Response::new(proto::MoveReply { reply }))
    }

    async fn get_performance(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<PerformanceReply>, Status> {
        let stats = self.with_session(|session| session.training_stats()).await?;
        Ok(Response::new(performance_reply(stats)))
    }
}

fn performance_reply(stats: TrainingStats) -> PerformanceReply {
    PerformanceReply {
        counts: Some(ResultCounts {
            wins: stats.counts.wins as u32,
            losses: stats.counts.losses as u32,
            draws: stats.counts.draws as u32,
            total: stats.counts.total as u32,
        }),
        recent_games: stats
            .recent_games
            .into_iter()
            .map(|game| proto::GameRecord {
                ts: game.ts,
                result: game.result,
                moves: game.moves as u32,
            })
            .collect(),
        recent_training: stats
            .recent_training
            .into_iter()
            .map(|record| proto::TrainingRecord {
                ts: record.ts,
                loss: record.loss,
            })
            .collect(),
    }
}
