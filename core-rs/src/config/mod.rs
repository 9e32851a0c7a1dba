//! Configuration: kvis.yaml settings and control-plane credentials

pub mod credentials;
pub mod settings;

pub use credentials::{expand_home, Credentials, DEFAULT_CREDENTIALS_FILE};
pub use settings::{
    KvisConfig, PortSettings, SchedulerSettings, ServerConfig, CONFIG_API_VERSION,
    DEFAULT_CONFIG_FILE,
};
