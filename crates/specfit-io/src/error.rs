/// An error type for the io module.
#[derive(thiserror::Error, Debug)]
pub enum IoError {
    /// Error when the file does not exist.
    #[error("File does not exist: {0}")]
    FileDoesNotExist(std::path::PathBuf),

    /// Invalid file extension.
    #[error("File does not have a valid extension: {0}")]
    InvalidFileExtension(std::path::PathBuf),

    /// Error to open the file.
    #[error("Failed to manipulate the file. {0}")]
    FileError(#[from] std::io::Error),

    /// Error to create the image.
    #[error("Failed to create image. {0}")]
    ImageCreationError(#[from] specfit_image::ImageError),

    /// The decoded image does not have the requested layout.
    #[error("Unexpected png layout {found:?}, expected {expected:?}")]
    UnexpectedLayout {
        /// Color type and bit depth that were requested.
        expected: (::png::ColorType, ::png::BitDepth),
        /// Color type and bit depth found in the file.
        found: (::png::ColorType, ::png::BitDepth),
    },

    /// Error to encode the PNG image.
    #[error("Failed to encode the png image. {0}")]
    PngEncodingError(String),

    /// Error to decode the PNG image.
    #[error("Failed to decode the png image. {0}")]
    PngDecodeError(String),
}
