use std::fmt;

/// Errors surfaced by relation and query operations.
///
/// `Not-found` is deliberately absent: an exhausted query scan is not an
/// error, it is `None` from `Query`'s `Iterator` implementation.
#[derive(Debug)]
pub enum RelnError {
    /// Bad choice vector, nonexistent relation, wrong attribute count.
    Configuration(String),
    /// A tuple does not fit into a freshly allocated page.
    Capacity { tuple_len: usize, page_capacity: usize },
    /// Failure in the underlying paged-file layer.
    Io(std::io::Error),
}

impl fmt::Display for RelnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelnError::Configuration(msg) => write!(f, "configuration error: {msg}"),
            RelnError::Capacity { tuple_len, page_capacity } => write!(
                f,
                "tuple of {tuple_len} bytes does not fit a fresh page (capacity {page_capacity})"
            ),
            RelnError::Io(e) => write!(f, "i/o error: {e}"),
        }
    }
}

impl std::error::Error for RelnError {}

impl From<std::io::Error> for RelnError {
    fn from(e: std::io::Error) -> Self {
        RelnError::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, RelnError>;
