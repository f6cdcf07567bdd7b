use thiserror::Error;

use super::mappings::MappingError;
use crate::platform::{ClientError, Platform};

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{operation} on {platform} failed: {source}")]
    Client {
        operation: &'static str,
        platform: Platform,
        #[source]
        source: ClientError,
    },
}

impl RelayError {
    pub fn client(operation: &'static str, platform: Platform, source: ClientError) -> Self {
        RelayError::Client {
            operation,
            platform,
            source,
        }
    }

    pub fn client_error(&self) -> &ClientError {
        match self {
            RelayError::Client { source, .. } => source,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.client_error().is_not_found()
    }
}

#[derive(Debug, Error)]
pub enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Mapping(#[from] MappingError),
}
