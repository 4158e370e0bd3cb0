use ulid::Ulid;

use crate::store::StoreError;

pub(crate) const TRAIN_NOT_ACTIVE: &str = "Train is not active.";
pub(crate) const SEAT_TRAIN_MISMATCH: &str = "Seat does not belong to this train.";
pub(crate) const SEAT_ALREADY_BOOKED: &str = "Seat is already booked.";
pub(crate) const NO_SEATS_REQUESTED: &str = "No seats requested.";
pub(crate) const DUPLICATE_SEATS: &str = "Duplicate seat ids in request.";
pub(crate) const NO_BOOKINGS_SPECIFIED: &str = "No bookings specified.";
pub(crate) const DUPLICATE_BOOKINGS: &str = "Duplicate booking ids in request.";
pub(crate) const ALREADY_CANCELLED: &str = "Booking is already cancelled.";
pub(crate) const NO_VALID_PENDING: &str = "No valid pending bookings to release.";
pub(crate) const MIXED_TRAINS: &str = "Held bookings must belong to the same train.";

/// Failure class, independent of detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    Unauthorized,
    Expired,
    StoreFailure,
}

#[derive(Debug)]
pub enum BookingError {
    NotFound { entity: &'static str, id: Ulid },
    InvalidState(String),
    /// Caller is neither the owner of this booking nor an admin.
    Unauthorized(Ulid),
    /// Hold's grace deadline passed before confirmation.
    Expired(Ulid),
    Store(StoreError),
}

impl BookingError {
    pub(crate) fn train_not_found(id: Ulid) -> Self {
        BookingError::NotFound { entity: "Train", id }
    }

    pub(crate) fn seat_not_found(id: Ulid) -> Self {
        BookingError::NotFound { entity: "Seat", id }
    }

    pub(crate) fn booking_not_found(id: Ulid) -> Self {
        BookingError::NotFound { entity: "Booking", id }
    }

    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        BookingError::InvalidState(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            BookingError::NotFound { .. } => ErrorKind::NotFound,
            BookingError::InvalidState(_) => ErrorKind::InvalidState,
            BookingError::Unauthorized(_) => ErrorKind::Unauthorized,
            BookingError::Expired(_) => ErrorKind::Expired,
            BookingError::Store(_) => ErrorKind::StoreFailure,
        }
    }

    /// Text safe to show an end user. Store faults never leak their cause.
    pub fn user_message(&self) -> String {
        match self {
            BookingError::Store(_) => "Operation failed. Please try again.".to_string(),
            other => other.to_string(),
        }
    }
}

impl std::fmt::Display for BookingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BookingError::NotFound { entity, id } => write!(f, "{entity} {id} not found."),
            BookingError::InvalidState(msg) => f.write_str(msg),
            BookingError::Unauthorized(id) => {
                write!(f, "You are not authorized to modify booking {id}.")
            }
            BookingError::Expired(id) => write!(f, "Hold has expired for booking {id}."),
            BookingError::Store(e) => write!(f, "operation failed: {e}"),
        }
    }
}

impl std::error::Error for BookingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BookingError::Store(e) => Some(e),
            _ => None,
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(e: StoreError) -> Self {
        BookingError::Store(e)
    }
}
