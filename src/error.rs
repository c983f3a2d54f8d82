use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("module not found: {0}")]
    ModuleNotFound(String),

    #[error("instance `{instance}` not found in module `{module}`")]
    InstanceNotFound { instance: String, module: String },

    #[error("pin index {index} out of range for module `{module}` ({num_pins} pins)")]
    PinNotFound {
        index: usize,
        module: String,
        num_pins: usize,
    },

    #[error("statement is not a transistor: {0}")]
    NotATransistor(String),

    #[error("unrecognized device model in line: {0}")]
    UnrecognizedDeviceModel(String),

    #[error("max delay of {max_delay:.3e}s is unattainable (best achievable delay is {best_delay:.3e}s)")]
    InfeasibleDelayTarget { max_delay: f64, best_delay: f64 },

    #[error("unknown wire layer: {0}")]
    UnknownLayer(String),

    #[error("invalid chain: {0}")]
    InvalidChain(String),

    #[error("invalid bounds: {0}")]
    InvalidBounds(String),

    #[error("no sizing configured for signal family `{0}`")]
    FamilyNotConfigured(String),

    #[error("peripheral load `{module}/{pin}` requires a cell netlist")]
    MissingNetlist { module: String, pin: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("failed to persist cache file: {0}")]
    Persist(#[from] tempfile::PersistError),
}

pub type Result<T> = std::result::Result<T, Error>;
