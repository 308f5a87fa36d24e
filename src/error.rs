use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("The selector you are trying to scrape for is missing. Selector: {0}")]
    ParseMissingSelector(String),

    #[error("Io Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Checkpoint file {path} is unusable")]
    Checkpoint {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Couldn't read config file {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
    #[error("Invalid config: {0}")]
    ConfigInvalid(String),

    #[error("Couldn't spawn the scraper process")]
    Spawn(#[source] std::io::Error),

    #[error("Tokio Join Error, couldn't await a task! {0}")]
    RuntimeJoin(#[from] tokio::task::JoinError),

    #[error("Reqwest Error: {0}")]
    Reqwest(#[from] reqwest::Error),
}

impl Error {
    /// Renders the error followed by every `source()` below it, so the
    /// underlying transport message ends up in the log.
    pub fn report(&self) -> String {
        let mut out = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            // `#[from]` variants already print their inner error.
            let text = err.to_string();
            if !out.contains(&text) {
                out.push_str(&format!("\n  caused by: {text}"));
            }
            cause = err.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_includes_source_chain() {
        let err = Error::Checkpoint {
            path: PathBuf::from("done_IDs.txt"),
            source: std::io::Error::new(std::io::ErrorKind::ConnectionReset, "Connection reset by peer"),
        };
        let report = err.report();
        assert!(report.starts_with("Checkpoint file done_IDs.txt is unusable"));
        assert!(report.contains("caused by: Connection reset by peer"));
    }

    #[test]
    fn report_does_not_repeat_a_wrapped_error() {
        let err = Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "Connection reset by peer",
        ));
        let report = err.report();
        assert_eq!(report, "Io Error: Connection reset by peer");
        assert_eq!(report.matches("Connection reset by peer").count(), 1);
    }
}
