use crate::ir::{BlockId, VReg};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("x87 stack overflow: no free slot for {vreg}")]
    StackOverflow { vreg: VReg },

    #[error("x87 stack underflow")]
    StackUnderflow,

    #[error("{0} is not on the x87 stack")]
    NotOnStack(VReg),

    #[error("{0} is already on the x87 stack")]
    AlreadyOnStack(VReg),

    #[error("cannot reconcile x87 stack at the end of {pred} with the entry of {succ}: {detail}")]
    UnreconcilableJoin {
        pred: BlockId,
        succ: BlockId,
        detail: String,
    },

    #[error("edge {from} -> {to} needs an x87 shuffle but {from} has several successors")]
    CriticalEdge { from: BlockId, to: BlockId },

    #[error("{depth} value(s) left on the x87 stack across a call")]
    LiveAcrossCall { depth: usize },

    #[error("Invalid x87 target configuration: {0}")]
    InvalidConfig(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{block}, instruction {index} `{inst}`: {source}")]
    Simulation {
        block: BlockId,
        index: usize,
        inst: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Attach the offending block and instruction to a handler failure.
    pub(crate) fn at(self, block: BlockId, index: usize, inst: impl ToString) -> Self {
        Error::Simulation {
            block,
            index,
            inst: inst.to_string(),
            source: Box::new(self),
        }
    }

    /// The underlying failure with any block/instruction context stripped.
    #[must_use]
    pub fn root(&self) -> &Error {
        match self {
            Error::Simulation { source, .. } => source.root(),
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
