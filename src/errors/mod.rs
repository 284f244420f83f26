// Copyright 2025 OpenObserve Inc.
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use thiserror::Error as ThisError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(ThisError, Debug)]
pub enum Error {
    /// A store-with-replace=false collided with an existing object. The
    /// facade surfaces this unchanged, it is never wrapped.
    #[error("ObjectAlreadyExists# {0}")]
    ObjectAlreadyExists(String),
    #[error("ObjectNotFound# {0}")]
    ObjectNotFound(String),
    /// A stored payload could not be deserialized. The offending trigger
    /// is moved to the error state.
    #[error("DecodeError# {0}")]
    Decode(String),
    #[error("ConstraintViolation# {0}")]
    ConstraintViolation(String),
    #[error("RedisError# {0}")]
    Redis(#[from] redis::RedisError),
    #[error("SerdeJsonError# {0}")]
    SerdeJson(#[from] serde_json::Error),
    #[error("IoError# {0}")]
    IoError(#[from] std::io::Error),
    /// The facade wrapper for every failure that is not
    /// `ObjectAlreadyExists`, carrying the original cause.
    #[error("PersistenceError# {0}")]
    Persistence(#[source] Box<Error>),
    #[error("Error# {0}")]
    Message(String),
}

impl Error {
    /// The innermost store error, unwrapping facade `Persistence` layers.
    pub fn cause(&self) -> &Error {
        match self {
            Error::Persistence(inner) => inner.cause(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::ObjectAlreadyExists("jobs.DEFAULT.cleanup".to_string());
        assert_eq!(
            "ObjectAlreadyExists# jobs.DEFAULT.cleanup",
            &err.to_string()
        );

        let err = Error::Message("Ni! Try again.".to_string());
        assert_eq!("Error# Ni! Try again.", &err.to_string());

        let err = Error::Persistence(Box::new(Error::Decode("bad trigger hash".to_string())));
        assert_eq!(
            "PersistenceError# DecodeError# bad trigger hash",
            &err.to_string()
        );
    }

    #[test]
    fn test_error_cause() {
        let err = Error::Persistence(Box::new(Error::ObjectNotFound("calendar:off".to_string())));
        assert!(matches!(err.cause(), Error::ObjectNotFound(_)));
    }
}
