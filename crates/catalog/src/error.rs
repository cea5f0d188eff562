use common::EntityKind;

/// Failure reported by a data provider. Carried inside events, so it is
/// cloneable and holds rendered messages rather than source errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProviderError {
    Unreachable(String),
    Status(u16),
    Malformed(String),
    Storage(String),
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderError::Unreachable(message) => write!(f, "provider unreachable: {}", message),
            ProviderError::Status(code) => write!(f, "provider returned status {}", code),
            ProviderError::Malformed(message) => write!(f, "malformed provider data: {}", message),
            ProviderError::Storage(message) => write!(f, "cache storage error: {}", message),
        }
    }
}

impl std::error::Error for ProviderError {}

#[derive(Debug, PartialEq, Eq)]
pub enum CatalogError {
    FilterKindMismatch {
        filter: EntityKind,
        repository: EntityKind,
    },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CatalogError::FilterKindMismatch { filter, repository } => write!(
                f,
                "filter over {} cannot be applied to the {} repository",
                filter, repository
            ),
        }
    }
}

impl std::error::Error for CatalogError {}
