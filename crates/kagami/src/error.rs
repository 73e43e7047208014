use std::{fmt::Display, io::ErrorKind};

use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Invalid binary key: {0:?}")]
    InvalidBinaryKey(Vec<u8>),

    #[error("Invalid iv: {0}")]
    InvalidIv(String),

    #[error("Pkcs7 unpad error")]
    UnpadError(#[from] UnpadError),

    #[error("Invalid m3u8 file: {0}")]
    M3u8ParseError(String),

    // MPEG-DASH errors
    #[error("Invalid mpd file: {0}")]
    MpdParsing(String),

    #[error(transparent)]
    MpdParseError(#[from] dash_mpd::DashMpdError),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    AcquireError(#[from] tokio::sync::AcquireError),

    /// An error raised while handling `uri`.
    #[error("{source}|{uri}")]
    WithUri {
        source: Box<MirrorError>,
        uri: String,
    },
}

impl MirrorError {
    /// Attach the uri being processed to this error.
    ///
    /// An error that already names a uri is returned untouched, so the deepest
    /// failing uri is the one reported.
    pub fn with_uri(self, uri: impl Display) -> Self {
        match self {
            Self::WithUri { .. } => self,
            source => Self::WithUri {
                source: Box::new(source),
                uri: uri.to_string(),
            },
        }
    }

    pub fn uri(&self) -> Option<&str> {
        match self {
            Self::WithUri { uri, .. } => Some(uri),
            _ => None,
        }
    }

    /// Whether the failure happened in transport and the request may succeed
    /// when issued again. HTTP status errors are never transient.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RequestError(e) => e.is_timeout() || e.is_connect() || e.is_request() || e.is_body(),
            Self::IOError(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::UnexpectedEof
            ),
            Self::WithUri { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

pub type MirrorResult<T> = Result<T, MirrorError>;

pub(crate) trait ResultUriExt<T> {
    fn with_uri(self, uri: impl Display) -> MirrorResult<T>;
}

impl<T, E> ResultUriExt<T> for Result<T, E>
where
    E: Into<MirrorError>,
{
    fn with_uri(self, uri: impl Display) -> MirrorResult<T> {
        self.map_err(|e| e.into().with_uri(uri))
    }
}
