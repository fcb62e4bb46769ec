pub mod bundle;
pub mod config;
pub mod error;
pub mod generator;
pub mod model;
pub mod normalize;
pub mod server;
pub mod upstream;

pub use bundle::BundleStore;
pub use config::AppConfig;
pub use error::ServiceError;
pub use generator::Generator;
pub use model::{GenerationRequest, GenerationResponse};
pub use server::build_router;
pub use upstream::{ChatBackend, ReqwestChatClient};
