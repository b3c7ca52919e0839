use thiserror::Error;

/// Everything that can go wrong between loading a picture and writing the
/// equalized result back out.
#[derive(Debug, Error)]
pub enum ClaheError {
    /// A precondition on the run parameters does not hold. Nothing has been
    /// scheduled when this is returned.
    #[error("Invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Pixel buffer holds {actual} bytes, expected {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A set of windows that must tile a rectangle leaves a gap or overlaps.
    #[error("Windows do not partition the image: {0}")]
    Partition(String),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker pool error: {0}")]
    WorkerPool(String),
}

impl ClaheError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ClaheError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ClaheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_parameter_names_the_field() {
        let err = ClaheError::invalid("tiles_x", "must be at least 1");
        assert_eq!(
            err.to_string(),
            "Invalid parameter `tiles_x`: must be at least 1"
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: ClaheError = std::io::Error::other("disk gone").into();
        assert!(matches!(err, ClaheError::Io(_)));
    }
}
