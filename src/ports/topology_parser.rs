use thiserror::Error;

use crate::core::topology::Topology;

/// Failure to turn descriptor bytes into a [`Topology`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ParseError {
    /// The content may still be being written; worth retrying shortly.
    #[error("transient parse failure: {0}")]
    Transient(String),

    /// The content is invalid and retrying will not help.
    #[error("invalid topology descriptor: {0}")]
    Permanent(String),
}

impl ParseError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ParseError::Transient(_))
    }
}

/// Parses descriptor file content.
///
/// Loader-owned attributes (source path, name, timestamp) are stamped onto
/// the result by the caller.
pub trait TopologyParser: Send + Sync + 'static {
    fn parse(&self, content: &[u8]) -> Result<Topology, ParseError>;
}

impl<F> TopologyParser for F
where
    F: Fn(&[u8]) -> Result<Topology, ParseError> + Send + Sync + 'static,
{
    fn parse(&self, content: &[u8]) -> Result<Topology, ParseError> {
        self(content)
    }
}

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum WriteError {
    #[error("failed to serialize topology: {0}")]
    Serialize(String),
}

/// Serializes a topology for deployment into the watched directory.
pub trait TopologyWriter: Send + Sync + 'static {
    /// File extension, without the dot, of descriptors this writer produces.
    fn extension(&self) -> &str;

    fn write(&self, topology: &Topology) -> Result<Vec<u8>, WriteError>;
}
