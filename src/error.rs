use thiserror::Error;

/// Error raised by a collaborator (model, cropper or optimizer) call.
#[derive(Debug, Error)]
#[error(transparent)]
pub struct CollaboratorError(#[from] pub Box<dyn std::error::Error + Send + Sync + 'static>);

impl CollaboratorError {
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("collaborator failure at frame {frame}")]
    Model {
        frame: usize,
        #[source]
        source: CollaboratorError,
    },

    #[error("image sequence is empty")]
    EmptySequence,
}

impl Error {
    /// Tag a collaborator error with the frame it aborted.
    pub fn at_frame(frame: usize) -> impl FnOnce(CollaboratorError) -> Error {
        move |source| Error::Model { frame, source }
    }
}
