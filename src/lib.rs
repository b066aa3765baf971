pub mod classifier;
pub mod config;
pub mod device;
pub mod hub;
pub mod hysteresis;
pub mod monitor;
pub mod types;
pub mod websocket;
pub mod window;

pub use classifier::{AnomalyModel, Classification, ClassifierError, Label, OnnxClassifier, WindowClassifier};
pub use config::{ConfigError, RelayConfig};
pub use device::DeviceSlot;
pub use hub::DashboardHub;
pub use hysteresis::AnomalyDebouncer;
pub use types::*;
pub use websocket::{handle_websocket, relay_router, RelayState};
pub use window::SignalWindow;
