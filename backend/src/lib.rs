pub mod classifier;
pub mod config;
pub mod error;
pub mod model;
pub mod routes;
pub mod state;
pub mod storage;

pub use classifier::{Classifier, Prediction};
pub use config::Config;
pub use error::ApiError;
pub use model::{InferenceError, ScoreModel};
pub use routes::configure_routes;
pub use state::AppState;
pub use storage::ImageStore;
