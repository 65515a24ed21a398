pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod types;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{ConfigProvider, NotifierConfig, TomlConfig};
pub use error::ConfigError;
pub use event::{ExceptionEvent, RequestInfo};
pub use types::TypeRegistry;
