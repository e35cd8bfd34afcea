//! Error types for the retrieval core

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("No corpus data found for user: {0}")]
    MissingCorpusData(String),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Embedding provider error: {0}")]
    EmbeddingProvider(String),

    #[error("Graph construction failed: {0}")]
    GraphConstruction(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::EmbeddingProvider(err.to_string())
    }
}

impl From<async_openai::error::OpenAIError> for Error {
    fn from(err: async_openai::error::OpenAIError) -> Self {
        Error::EmbeddingProvider(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_storage() {
        let err = Error::Storage("data root missing".to_string());
        assert!(err.to_string().contains("Storage error"));
        assert!(err.to_string().contains("data root missing"));
    }

    #[test]
    fn test_error_display_missing_corpus() {
        let err = Error::MissingCorpusData("user-1".to_string());
        assert!(err.to_string().contains("No corpus data"));
        assert!(err.to_string().contains("user-1"));
    }

    #[test]
    fn test_error_display_malformed_record() {
        let err = Error::MalformedRecord("unparsable start time".to_string());
        let msg = err.to_string();
        assert!(msg.contains("Malformed record"));
        assert!(msg.contains("start time"));
    }

    #[test]
    fn test_error_display_embedding_provider() {
        let err = Error::EmbeddingProvider("rate limit exceeded".to_string());
        assert!(err.to_string().contains("Embedding provider"));
        assert!(err.to_string().contains("rate limit"));
    }

    #[test]
    fn test_error_display_graph_construction() {
        let err = Error::GraphConstruction("non-finite weight".to_string());
        assert!(err.to_string().contains("Graph construction failed"));
    }

    #[test]
    fn test_error_from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::IoError(_)));
        assert!(err.to_string().contains("IO error"));
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
        assert!(err.to_string().contains("Serialization error"));
    }

    #[test]
    fn test_error_from_serde_yaml() {
        let yaml_err = serde_yaml::from_str::<Vec<i32>>("a: [").unwrap_err();
        let err: Error = yaml_err.into();

        assert!(matches!(err, Error::SerializationError(_)));
    }

    #[test]
    fn test_error_debug_impl() {
        let err = Error::Config("bad provider".to_string());
        let debug_str = format!("{:?}", err);
        assert!(debug_str.contains("Config"));
    }
}
