use thiserror::Error;

use crate::ids::NodeId;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// A move or insert that cannot be expressed in the nested-set encoding.
    ///
    /// Raised before anything is written.
    #[error("invalid target: {0}")]
    InvalidTarget(String),
    #[error("tree class already registered: {0}")]
    AlreadyRegistered(String),
    #[error("tree class not registered: {0}")]
    NotRegistered(String),
    #[error("can't disable or delay tree updates: {0}")]
    CantDisableUpdates(String),
    #[error("node not found: {0}")]
    NodeNotFound(NodeId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("inconsistent state: {0}")]
    InconsistentState(String),
    #[error("node {0} not in depth-first order")]
    NotDepthFirst(NodeId),
    #[error("storage error: {0}")]
    Storage(String),
}
