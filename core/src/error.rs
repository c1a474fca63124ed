use tycho_types::cell::HashBytes;
use tycho_types::models::StdAddr;

/// Conditions after which the indexing pipeline must be restarted from the
/// last committed master block.
#[derive(Debug, thiserror::Error)]
pub enum FatalError {
    #[error("source of message {hash} not found (master block {master_seqno})")]
    UnknownMessageSource {
        master_seqno: u32,
        hash: HashBytes,
        dst: Option<StdAddr>,
    },
    #[error("failed to commit batch up to master block {master_seqno} after {attempts} attempts")]
    CommitFailed {
        master_seqno: u32,
        attempts: usize,
        #[source]
        source: anyhow::Error,
    },
    #[error("received master block {seqno} while expecting {expected}")]
    OutOfOrder { seqno: u32, expected: u32 },
}

impl FatalError {
    /// Master block at which the pipeline failed.
    pub fn master_seqno(&self) -> u32 {
        match self {
            Self::UnknownMessageSource { master_seqno, .. }
            | Self::CommitFailed { master_seqno, .. } => *master_seqno,
            Self::OutOfOrder { seqno, .. } => *seqno,
        }
    }
}
