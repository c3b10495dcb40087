//! Typed payloads for the consensus endpoints.
//!
//! Field names follow the JSON wire format used by `/vote` and `/heartBeat`.
//! The camelCase spellings of the id fields are accepted on input so that
//! hand-written clients do not have to match the capitalised `ID` suffix.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRequest {
    #[serde(rename = "candidateID", alias = "candidateId")]
    pub candidate_id: u64,
    pub term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: u64,
    #[serde(rename = "voteGranted")]
    pub vote_granted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    #[serde(rename = "leaderID", alias = "leaderId")]
    pub leader_id: u64,
    #[serde(rename = "leaderAddr", alias = "leaderAddress")]
    pub leader_addr: String,
    #[serde(rename = "leaderTerm")]
    pub leader_term: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    #[serde(rename = "currentTerm")]
    pub current_term: u64,
    pub success: bool,
}
