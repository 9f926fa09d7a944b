//! Error types for the precache library.

use thiserror::Error;

/// Errors that can occur while installing caches or handling requests.
#[derive(Error, Debug)]
pub enum Error {
    /// The network fetch failed before a response was received.
    #[error("Network error: {0}")]
    Network(String),

    /// HTTP client error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// A fetch completed but the server answered with a non-success status.
    #[error("Unexpected status {status} for {url}")]
    Status {
        /// URL that was fetched.
        url: String,
        /// Status code returned by the server.
        status: u16,
    },

    /// A manifest entry could not be cached, aborting the install.
    #[error("Install failed on {url}: {source}")]
    Install {
        /// Manifest entry that failed.
        url: String,
        /// Underlying failure.
        #[source]
        source: Box<Error>,
    },

    /// A URL or manifest entry could not be parsed.
    #[error("Invalid URL {url}: {reason}")]
    InvalidUrl {
        /// The offending input.
        url: String,
        /// Parser message.
        reason: String,
    },

    /// Cache stores only key `GET` requests.
    #[error("Cannot cache a {0} request")]
    UnsupportedMethod(String),

    /// The worker was asked to activate before a successful install.
    #[error("Worker is not installed")]
    NotInstalled,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cache entry or config (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error from a persistent cache store or config file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns true if this error came from the network layer rather than
    /// from the cache stores.
    #[must_use]
    pub const fn is_network(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http(_) | Self::Status { .. })
    }
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<toml::ser::Error> for Error {
    fn from(e: toml::ser::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// A specialized `Result` type for precache operations.
pub type Result<T> = std::result::Result<T, Error>;
