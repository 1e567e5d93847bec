/// Top-level error for the `archivistd` binary's startup and one-shot
/// command paths. Per-subsystem errors (`ValidateError`, `ExtractError`,
/// `SourceError`, `OrchestratorError`, `StoreError`) live beside the code
/// that produces them and are not flattened into this type — only the
/// outermost entry point needs a single `Result` to `?` through.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] crate::config::ConfigError),

    #[error(transparent)]
    Store(#[from] crate::store::StoreError),

    #[error(transparent)]
    Scan(#[from] crate::scanner::ScanError),

    #[error("internal error: {0}")]
    Internal(String),
}
