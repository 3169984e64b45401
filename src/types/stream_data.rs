//! Generator stream signals and branch placement.

use crate::error::BranchError;

/// One step of a generator stream.
///
/// Each call to a generator's action yields one of these; the generator
/// decides from the variant whether to keep looping (`More`) or to stop
/// (`Last`, `Done`, `Error`). Downstream continuations receive the same
/// variant as their input event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamData<T> {
    /// A value, with more to follow.
    More(T),
    /// The final value of the stream.
    Last(T),
    /// The stream ended without a value.
    Done,
    /// The stream failed; delivered to the downstream continuation as an
    /// event so it can decide whether to surface or swallow the error.
    Error(BranchError),
}

impl<T> StreamData<T> {
    /// Returns true if this signal ends the generator loop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        !matches!(self, Self::More(_))
    }

    /// Returns true if this signal carries an error.
    #[must_use]
    pub const fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// Maps the carried value, leaving the signal shape unchanged.
    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> StreamData<U> {
        match self {
            Self::More(v) => StreamData::More(f(v)),
            Self::Last(v) => StreamData::Last(f(v)),
            Self::Done => StreamData::Done,
            Self::Error(e) => StreamData::Error(e),
        }
    }

    /// Extracts the carried value, if any.
    #[must_use]
    pub fn value(self) -> Option<T> {
        match self {
            Self::More(v) | Self::Last(v) => Some(v),
            Self::Done | Self::Error(_) => None,
        }
    }

    /// Converts the signal into a result, surfacing carried errors.
    pub fn into_result(self) -> Result<Option<T>, BranchError> {
        match self {
            Self::More(v) | Self::Last(v) => Ok(Some(v)),
            Self::Done => Ok(None),
            Self::Error(e) => Err(e),
        }
    }
}

/// Where a branch currently runs relative to its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Location {
    /// Executing normally on its own worker.
    Worker,
    /// A producer that has delegated downstream work to forked children.
    WaitingParent,
    /// Pinned to the current worker; children are resumed in line and may
    /// not delegate to new workers.
    RemoteNode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminality() {
        assert!(!StreamData::More(1).is_terminal());
        assert!(StreamData::Last(1).is_terminal());
        assert!(StreamData::<i32>::Done.is_terminal());
        assert!(StreamData::<i32>::Error(BranchError::action("boom")).is_terminal());
    }

    #[test]
    fn map_preserves_shape() {
        assert_eq!(StreamData::More(2).map(|v| v * 10), StreamData::More(20));
        assert_eq!(StreamData::Last(2).map(|v| v * 10), StreamData::Last(20));
        assert_eq!(StreamData::<i32>::Done.map(|v| v * 10), StreamData::Done);
    }

    #[test]
    fn into_result_surfaces_errors() {
        assert_eq!(StreamData::More(1).into_result(), Ok(Some(1)));
        assert_eq!(StreamData::<i32>::Done.into_result(), Ok(None));
        assert!(StreamData::<i32>::Error(BranchError::action("boom"))
            .into_result()
            .is_err());
    }
}
