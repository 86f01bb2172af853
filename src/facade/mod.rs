pub mod config;
pub mod prevalence;

pub use config::PrevalenceConfig;
pub use prevalence::{Prevalence, PrevalenceBuilder};
