use thiserror::Error;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("invalid npy file: {0}")]
    InvalidNpy(String),

    #[error("unsupported image layout: {0}")]
    UnsupportedLayout(String),

    #[error("class index {index} is outside the label table ({len} labels)")]
    LabelOutOfRange { index: usize, len: usize },

    #[error("layer list has {len} blobs, cannot take the one {offset} from the end")]
    MissingLayer { len: usize, offset: usize },

    #[error("feature blob has {rows} rows, center crop index {index} is out of range")]
    MissingCenterCrop { rows: usize, index: usize },

    #[error("{task} expects {expected} arguments, got {got}")]
    BadArguments {
        task: String,
        expected: usize,
        got: usize,
    },

    #[error("no processor registered for task type {0}")]
    NoProcessor(String),

    #[error("network returned no blobs")]
    EmptyForward,
}
