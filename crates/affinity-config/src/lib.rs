pub mod loader;
pub mod model;

pub use loader::ConfigLoader;
pub use model::{
    AppConfig, ChatConfig, GatewayConfig, MemoryConfig, RemoteConfig, RetentionConfig,
    StorageConfig,
};
