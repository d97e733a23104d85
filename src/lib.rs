pub mod config;
pub mod rl;
pub mod server;
pub mod session;

pub use config::Config;
pub use session::{MoveReply, Session, SessionConfig};

pub mod proto {
    tonic::include_proto!("chessmind");
}

#[cfg(not(feature = "metal"))]
pub type InferenceBackend = burn::backend::NdArray;

#[cfg(feature = "metal")]
pub type InferenceBackend = burn::backend::Metal;

pub type TrainingBackend = burn::backend::Autodiff<InferenceBackend>;
