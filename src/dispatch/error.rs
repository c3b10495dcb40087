use thiserror::Error;

use crate::executor::CalcError;
use crate::network::NetworkError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error(transparent)]
    Calc(#[from] CalcError),

    #[error("no leader known")]
    NoLeader,

    #[error("leader unreachable: {0}")]
    LeaderUnreachable(NetworkError),

    #[error("{body}")]
    Upstream { status: u16, body: String },

    #[error("no member answered the calculation")]
    NoResponses,

    #[error("worker unreachable: {0}")]
    WorkerUnreachable(NetworkError),
}

impl DispatchError {
    pub fn status_code(&self) -> u16 {
        match self {
            DispatchError::Calc(e) => e.status_code(),
            DispatchError::NoLeader | DispatchError::NoResponses => 503,
            DispatchError::LeaderUnreachable(_) | DispatchError::WorkerUnreachable(_) => 502,
            DispatchError::Upstream { status, .. } => *status,
        }
    }
}
