use thiserror::Error;

#[derive(Error, Debug)]
pub enum RaftError {
    #[error("Not a leader")]
    NotLeader,

    #[error("Node {0} is missing from its own cluster view")]
    MissingSelf(u64),

    #[error("Node {id} is configured at {configured} but its cluster view lists {listed}")]
    AddressMismatch {
        id: u64,
        configured: String,
        listed: String,
    },
}
