//! A set of utilities to enable logging configuration using tracing_subscriber.

use std::{io::IsTerminal, sync::Once};

use tracing_subscriber::{self, EnvFilter, filter::LevelFilter};

static MARGINALIA_LOG_ENV_VAR: &str = "MARGINALIA_LOG";

/// Initializes a tracing subscriber for logging.
pub fn init() {
    // Since we also use this function to enable logging in tests, wrap it in `Once` to prevent
    // multiple initializations.
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let env_filter = env_filter();

        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(std::io::stderr().is_terminal())
            .init();
    });
}

/// List of crates in the workspace.
const MARGINALIA_CRATES: &[&str] = &[
    "doc_batcher",
    "doc_codec",
    "monitoring",
    "persistence",
    "persistence_api",
    "persistence_db",
];

fn env_filter() -> EnvFilter {
    // Parse directives from RUST_LOG
    let log_filter = EnvFilter::builder().with_default_directive(LevelFilter::ERROR.into());
    let directive_string = std::env::var(EnvFilter::DEFAULT_ENV).unwrap_or_default();
    let mut env_filter = log_filter.parse(&directive_string).unwrap();

    let log_level = std::env::var(MARGINALIA_LOG_ENV_VAR).unwrap_or_else(|_| "info".to_string());

    for crate_name in MARGINALIA_CRATES {
        // Add directives for each crate in MARGINALIA_CRATES, if not overriden by RUST_LOG
        if !directive_string.contains(&format!("{crate_name}=")) {
            env_filter =
                env_filter.add_directive(format!("{crate_name}={log_level}").parse().unwrap());
        }
    }

    env_filter
}

/// Collect the error source chain as a vector of strings for tracing.
///
/// Walks the `.source()` chain of the provided error and collects each source's
/// Display representation into a vector. Returns a `DebugValue<Vec<String>>` that
/// can be used directly in tracing macros. Returns an empty vector if the error
/// has no source chain.
pub fn error_source(err: &dyn std::error::Error) -> tracing::field::DebugValue<Vec<String>> {
    let mut sources = Vec::new();
    let mut current = err.source();

    while let Some(curr) = current {
        sources.push(curr.to_string());
        current = curr.source();
    }

    tracing::field::debug(sources)
}

#[cfg(test)]
mod tests {
    use cargo_metadata::MetadataCommand;

    use super::*;

    /// If this fails, just update the above `MARGINALIA_CRATES` to match reality.
    #[test]
    fn workspace_crates_match_marginalia_crates_list() {
        //* Given
        let cmd = MetadataCommand::new()
            .exec()
            .expect("should execute cargo metadata command");

        //* When
        let mut names: Vec<String> = cmd
            .workspace_packages()
            .iter()
            .map(|pkg| pkg.name.to_string().replace('-', "_"))
            .collect();
        names.sort();

        //* Then
        let mut expected: Vec<String> = MARGINALIA_CRATES
            .iter()
            .map(|name| name.to_string())
            .collect();
        expected.sort();
        assert_eq!(names, expected);
    }

    #[derive(Debug)]
    struct TestError {
        message: &'static str,
        source: Option<Box<TestError>>,
    }

    impl std::fmt::Display for TestError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.message)
        }
    }

    impl std::error::Error for TestError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            self.source
                .as_ref()
                .map(|source| source as &(dyn std::error::Error + 'static))
        }
    }

    #[test]
    fn error_source_with_three_level_chain_returns_two_sources() {
        //* Given
        let err = TestError {
            message: "outer",
            source: Some(Box::new(TestError {
                message: "middle",
                source: Some(Box::new(TestError {
                    message: "root",
                    source: None,
                })),
            })),
        };

        //* When
        let sources = error_source(&err);

        //* Then
        assert_eq!(format!("{sources:?}"), r#"["middle", "root"]"#);
    }

    #[test]
    fn error_source_with_no_source_returns_empty_vec() {
        //* Given
        let err = TestError {
            message: "standalone",
            source: None,
        };

        //* When
        let sources = error_source(&err);

        //* Then
        assert_eq!(format!("{sources:?}"), "[]");
    }
}
