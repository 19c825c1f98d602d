use crate::geometry::Cell;
use crate::store::StoreError;
use crate::tile::GenerateError;
use thiserror::Error;

/// Stable error classes callers branch on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Occupied,
    Restricted,
    NotFound,
    Unavailable,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Cell {0} already holds your marker")]
    Occupied(Cell),

    #[error("Cell {cell} is restricted by {} marker(s)", .blockers.len())]
    Restricted { cell: Cell, blockers: Vec<Cell> },

    #[error("No marker at {0}")]
    NotFound(Cell),

    #[error("Marker store unavailable: {0}")]
    Store(#[from] StoreError),

    #[error("Tile generation failed: {0}")]
    Generation(#[from] GenerateError),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::Occupied(_) => ErrorKind::Occupied,
            ServiceError::Restricted { .. } => ErrorKind::Restricted,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Store(_) | ServiceError::Generation(_) => ErrorKind::Unavailable,
        }
    }

    /// Whether retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct_for_conflicts() {
        let occupied = ServiceError::Occupied(Cell::new(1, 2));
        let restricted = ServiceError::Restricted {
            cell: Cell::new(1, 2),
            blockers: vec![Cell::new(1, 0)],
        };
        assert_eq!(occupied.kind(), ErrorKind::Occupied);
        assert_eq!(restricted.kind(), ErrorKind::Restricted);
        assert_eq!(restricted.to_string(), "Cell (1, 2) is restricted by 1 marker(s)");
    }

    #[test]
    fn test_store_failures_are_transient() {
        let err: ServiceError = StoreError::Unavailable("disk gone".into()).into();
        assert!(err.is_transient());
        assert!(!ServiceError::Validation("bad".into()).is_transient());
    }
}
