use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KarismaError {
    #[error("Unable to access {unique_id} ({source})")]
    BusUnavailable {
        unique_id: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to write pin {pin} of {unique_id}: {source}")]
    WriteFailed {
        unique_id: String,
        pin: u8,
        #[source]
        source: io::Error,
    },

    #[error("Invalid pin number '{0}', expected 0 to 15")]
    InvalidPin(u8),

    #[error("Invalid i2c address '{0}', expected 0 to 127")]
    InvalidAddress(u8),

    #[error("I/O worker '{0}' is gone")]
    WorkerGone(String),
}

impl KarismaError {
    pub fn bus_unavailable<S: Into<String>>(unique_id: S, source: io::Error) -> Self {
        Self::BusUnavailable {
            unique_id: unique_id.into(),
            source,
        }
    }

    #[cfg(test)]
    pub fn is_bus_unavailable(&self) -> bool {
        matches!(self, KarismaError::BusUnavailable { .. })
    }
}
