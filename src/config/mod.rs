pub mod loader;
pub mod schema;

pub use loader::{
    EnvOverrides, default_config_path, load_config, load_default_config, resolve_config_path,
    save_config,
};
pub use schema::{
    BudgetConfig, ClassifierConfig, LoopConfig, RuntimeConfig, SchedulerConfig, StoreConfig,
};
