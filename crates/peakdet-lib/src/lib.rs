pub mod detectors;
pub mod editor;
pub mod error;
pub mod filter;
pub mod history;
pub mod io;
pub mod metrics;
pub mod signal;

pub use detectors::*;
pub use error::{PhysioError, PhysioResult};
pub use metrics::*;
pub use signal::*;
