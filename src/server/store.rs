//! The weekly booking calendar: overlap checks on half-open intervals,
//! free-interval computation, and the confirmation-id counter.
//!
//! The store is pure state. It never logs and never touches the network;
//! errors are typed and carry the wire error code plus a detail string.

use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::protocol::messages::ErrorCode;
use crate::protocol::time::{FreeInterval, WeekTime, MINUTES_PER_DAY, MINUTES_PER_WEEK};

#[derive(Debug, Error, Eq, PartialEq)]
pub enum BookingError {
    #[error("facility '{0}' not found")]
    FacilityNotFound(String),
    #[error("no booking with confirmation id '{0}'")]
    BookingNotFound(String),
    #[error("{0}")]
    InvalidTime(String),
    #[error("{0}")]
    Conflict(String),
    #[error("booking '{0}' has already been cancelled")]
    AlreadyCancelled(String),
}

impl BookingError {
    pub fn code(&self) -> ErrorCode {
        match self {
            BookingError::FacilityNotFound(_) | BookingError::BookingNotFound(_) => ErrorCode::NotFound,
            BookingError::InvalidTime(_) => ErrorCode::InvalidTime,
            BookingError::Conflict(_) => ErrorCode::Conflict,
            BookingError::AlreadyCancelled(_) => ErrorCode::Cancelled,
        }
    }
}

/// Facilities whose free-interval view changed as a result of a mutation;
/// the dispatcher feeds this into monitor fan-out.
pub type NotificationSet = Vec<String>;

#[derive(Debug)]
struct Booking {
    facility: String,
    start: u16,
    end: u16,
    /// End minute at creation time. EXTEND always computes from this, never
    /// from the current end.
    original_end: u16,
    cancelled: bool,
}

impl Booking {
    fn is_active(&self) -> bool {
        !self.cancelled
    }

    fn overlaps(&self, start: u16, end: u16) -> bool {
        self.is_active() && start < self.end && self.start < end
    }
}

#[derive(Debug, Default)]
struct Facility {
    booking_ids: Vec<String>,
}

pub struct BookingStore {
    facilities: FxHashMap<String, Facility>,
    bookings: FxHashMap<String, Booking>,
    next_confirmation: u64,
}

impl BookingStore {
    pub fn new(facility_names: impl IntoIterator<Item = impl Into<String>>) -> BookingStore {
        let facilities = facility_names
            .into_iter()
            .map(|name| (name.into(), Facility::default()))
            .collect();

        BookingStore {
            facilities,
            bookings: FxHashMap::default(),
            next_confirmation: 1,
        }
    }

    pub fn facility_names(&self) -> impl Iterator<Item = &str> {
        self.facilities.keys().map(String::as_str)
    }

    pub fn has_facility(&self, name: &str) -> bool {
        self.facilities.contains_key(name)
    }

    /// Free intervals over the union of the requested day windows, merged
    /// into maximal runs (adjacent requested days merge across midnight),
    /// sorted by start. An empty result means fully booked.
    pub fn query(&self, facility: &str, days: &[u8]) -> Result<Vec<FreeInterval>, BookingError> {
        if days.iter().any(|&d| d > 6) {
            return Err(BookingError::InvalidTime("day index out of range".to_string()));
        }
        let fac = self
            .facilities
            .get(facility)
            .ok_or_else(|| BookingError::FacilityNotFound(facility.to_string()))?;

        Ok(self.free_intervals(fac, days))
    }

    /// Free intervals over the whole week, for monitor callbacks.
    pub fn week_view(&self, facility: &str) -> Result<Vec<FreeInterval>, BookingError> {
        self.query(facility, &[0, 1, 2, 3, 4, 5, 6])
    }

    pub fn book(
        &mut self,
        facility: &str,
        start: WeekTime,
        end: WeekTime,
    ) -> Result<(String, NotificationSet), BookingError> {
        if !self.facilities.contains_key(facility) {
            return Err(BookingError::FacilityNotFound(facility.to_string()));
        }
        let (start, end) = (start.minutes(), end.minutes());
        if start >= end {
            return Err(BookingError::InvalidTime("start time must be before end time".to_string()));
        }
        self.check_conflict(facility, start, end, None)?;

        let confirmation_id = format!("CONF{:06}", self.next_confirmation);
        self.next_confirmation += 1;

        self.bookings.insert(
            confirmation_id.clone(),
            Booking {
                facility: facility.to_string(),
                start,
                end,
                original_end: end,
                cancelled: false,
            },
        );
        if let Some(fac) = self.facilities.get_mut(facility) {
            fac.booking_ids.push(confirmation_id.clone());
        }

        Ok((confirmation_id, vec![facility.to_string()]))
    }

    /// Shifts both ends by `offset` minutes. Non-idempotent: a duplicate
    /// delivery shifts again.
    pub fn change(&mut self, confirmation_id: &str, offset: i32) -> Result<NotificationSet, BookingError> {
        let booking = self.active_booking(confirmation_id)?;
        let new_start = booking.start as i32 + offset;
        let new_end = booking.end as i32 + offset;
        if new_start < 0 || new_end > MINUTES_PER_WEEK as i32 {
            return Err(BookingError::InvalidTime("shifted time range leaves the week".to_string()));
        }
        let (new_start, new_end) = (new_start as u16, new_end as u16);
        if new_start == booking.start {
            return Ok(Vec::new());
        }
        let facility = booking.facility.clone();
        self.check_conflict(&facility, new_start, new_end, Some(confirmation_id))?;

        let booking = self.bookings.get_mut(confirmation_id)
            .ok_or_else(|| BookingError::BookingNotFound(confirmation_id.to_string()))?;
        booking.start = new_start;
        booking.end = new_end;

        Ok(vec![facility])
    }

    /// Sets the end to `original end + extra`. Re-execution with the same
    /// argument is a no-op: the operation is idempotent under duplicate
    /// delivery.
    pub fn extend(&mut self, confirmation_id: &str, extra: u32) -> Result<NotificationSet, BookingError> {
        let booking = self.active_booking(confirmation_id)?;
        let new_end = booking.original_end as u64 + extra as u64;
        if new_end > MINUTES_PER_WEEK as u64 {
            return Err(BookingError::InvalidTime("extended end leaves the week".to_string()));
        }
        let new_end = new_end as u16;
        if new_end <= booking.start {
            return Err(BookingError::InvalidTime("extended end precedes the booking start".to_string()));
        }
        if new_end == booking.end {
            return Ok(Vec::new());
        }
        let facility = booking.facility.clone();
        if new_end > booking.end {
            self.check_conflict(&facility, booking.end, new_end, Some(confirmation_id))?;
        }

        let booking = self.bookings.get_mut(confirmation_id)
            .ok_or_else(|| BookingError::BookingNotFound(confirmation_id.to_string()))?;
        booking.end = new_end;

        Ok(vec![facility])
    }

    /// Non-idempotent: the first call succeeds, every later one fails.
    /// Cancelled bookings stay in the ledger but stop counting for overlap.
    pub fn cancel(&mut self, confirmation_id: &str) -> Result<NotificationSet, BookingError> {
        let booking = self.active_booking(confirmation_id)?;
        let facility = booking.facility.clone();

        let booking = self.bookings.get_mut(confirmation_id)
            .ok_or_else(|| BookingError::BookingNotFound(confirmation_id.to_string()))?;
        booking.cancelled = true;

        Ok(vec![facility])
    }

    fn active_booking(&self, confirmation_id: &str) -> Result<&Booking, BookingError> {
        let booking = self
            .bookings
            .get(confirmation_id)
            .ok_or_else(|| BookingError::BookingNotFound(confirmation_id.to_string()))?;
        if booking.cancelled {
            return Err(BookingError::AlreadyCancelled(confirmation_id.to_string()));
        }
        Ok(booking)
    }

    fn check_conflict(
        &self,
        facility: &str,
        start: u16,
        end: u16,
        exclude: Option<&str>,
    ) -> Result<(), BookingError> {
        let Some(fac) = self.facilities.get(facility) else {
            return Err(BookingError::FacilityNotFound(facility.to_string()));
        };
        for id in &fac.booking_ids {
            if exclude == Some(id.as_str()) {
                continue;
            }
            if let Some(other) = self.bookings.get(id) {
                if other.overlaps(start, end) {
                    return Err(BookingError::Conflict(format!(
                        "facility '{}' is not available during the requested period",
                        facility
                    )));
                }
            }
        }
        Ok(())
    }

    fn free_intervals(&self, fac: &Facility, days: &[u8]) -> Vec<FreeInterval> {
        let mut windows = Vec::new();
        let mut requested = [false; 7];
        for &d in days {
            requested[d as usize] = true;
        }
        let mut day = 0usize;
        while day < 7 {
            if requested[day] {
                let start = day as u16 * MINUTES_PER_DAY;
                let mut until = day + 1;
                while until < 7 && requested[until] {
                    until += 1;
                }
                windows.push((start, until as u16 * MINUTES_PER_DAY));
                day = until;
            } else {
                day += 1;
            }
        }

        let mut booked: Vec<(u16, u16)> = fac
            .booking_ids
            .iter()
            .filter_map(|id| self.bookings.get(id))
            .filter(|b| b.is_active())
            .map(|b| (b.start, b.end))
            .collect();
        booked.sort_unstable();

        let mut free = Vec::new();
        for (win_start, win_end) in windows {
            let mut cursor = win_start;
            for &(b_start, b_end) in &booked {
                if b_end <= win_start || b_start >= win_end {
                    continue;
                }
                if cursor < b_start {
                    free.push(FreeInterval {
                        start: WeekTime::from_minutes(cursor),
                        end: WeekTime::from_minutes(b_start),
                    });
                }
                cursor = cursor.max(b_end.min(win_end));
            }
            if cursor < win_end {
                free.push(FreeInterval {
                    start: WeekTime::from_minutes(cursor),
                    end: WeekTime::from_minutes(win_end),
                });
            }
        }
        free
    }
}
