//! Uniform success/failure result of background operations.

/// Outcome delivered to the completion of every async operation.
///
/// Carries exactly one of a payload or an error. Blocking counterparts
/// return `Result<T, E>` with the same `T` and `E`.
#[derive(Debug, Clone, PartialEq)]
#[must_use]
pub enum OperationResult<T, E> {
    Success(T),
    Failure(E),
}

impl<T, E> OperationResult<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Self::Success(value) => Some(value),
            Self::Failure(_) => None,
        }
    }

    pub fn failure(self) -> Option<E> {
        match self {
            Self::Success(_) => None,
            Self::Failure(err) => Some(err),
        }
    }

    pub fn map<U>(self, op: impl FnOnce(T) -> U) -> OperationResult<U, E> {
        match self {
            Self::Success(value) => OperationResult::Success(op(value)),
            Self::Failure(err) => OperationResult::Failure(err),
        }
    }

    pub fn map_failure<F>(self, op: impl FnOnce(E) -> F) -> OperationResult<T, F> {
        match self {
            Self::Success(value) => OperationResult::Success(value),
            Self::Failure(err) => OperationResult::Failure(op(err)),
        }
    }

    pub fn into_result(self) -> Result<T, E> {
        match self {
            Self::Success(value) => Ok(value),
            Self::Failure(err) => Err(err),
        }
    }
}

impl<T, E> From<Result<T, E>> for OperationResult<T, E> {
    fn from(value: Result<T, E>) -> Self {
        match value {
            Ok(value) => Self::Success(value),
            Err(err) => Self::Failure(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::OperationResult;

    #[test]
    fn converts_both_ways_with_result() {
        let ok: OperationResult<u8, String> = Ok(3).into();
        assert!(ok.is_success());
        assert_eq!(ok.into_result(), Ok(3));

        let failed: OperationResult<u8, String> = Err("boom".to_string()).into();
        assert!(failed.is_failure());
        assert_eq!(failed.clone().success(), None);
        assert_eq!(failed.failure().as_deref(), Some("boom"));
    }

    #[test]
    fn map_touches_only_its_side() {
        let ok: OperationResult<u8, String> = OperationResult::Success(2);
        assert_eq!(ok.map(|n| n * 2), OperationResult::Success(4));

        let failed: OperationResult<u8, String> = OperationResult::Failure("x".to_string());
        assert_eq!(
            failed.map_failure(|e| e.len()),
            OperationResult::Failure(1)
        );
    }
}
