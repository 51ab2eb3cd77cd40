use std::fmt::{Debug, Display, Formatter};

use anyhow::anyhow;
use bytes::{Buf, BufMut};

pub const MINUTES_PER_DAY: u16 = 24 * 60;
pub const MINUTES_PER_WEEK: u16 = 7 * MINUTES_PER_DAY;

const DAY_NAMES: [&str; 7] = ["Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// A point in the weekly calendar, normalized to minutes since Monday 00:00.
///
/// Valid values are `0..=10_080`: the upper bound is the exclusive end of the
/// week, needed so that half-open intervals reaching Sunday midnight are
/// representable. On the wire it is a three-byte `(day, hour, minute)`
/// triple; the week-end bound is the triple `(7, 0, 0)`, the only legal
/// encoding with a day outside `0..=6`.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct WeekTime(u16);

impl WeekTime {
    pub fn try_from_parts(day: u8, hour: u8, minute: u8) -> anyhow::Result<WeekTime> {
        match (day, hour, minute) {
            (7, 0, 0) => Ok(WeekTime(MINUTES_PER_WEEK)),
            (0..=6, 0..=23, 0..=59) => {
                Ok(WeekTime(day as u16 * MINUTES_PER_DAY + hour as u16 * 60 + minute as u16))
            }
            _ => Err(anyhow!("time out of range: day={} hour={} minute={}", day, hour, minute)),
        }
    }

    pub fn try_from_minutes(minutes: u16) -> anyhow::Result<WeekTime> {
        if minutes > MINUTES_PER_WEEK {
            return Err(anyhow!("minute {} is outside the week", minutes));
        }
        Ok(WeekTime(minutes))
    }

    /// For minute values the caller already knows to be inside the week.
    pub(crate) fn from_minutes(minutes: u16) -> WeekTime {
        debug_assert!(minutes <= MINUTES_PER_WEEK);
        WeekTime(minutes)
    }

    pub fn minutes(self) -> u16 {
        self.0
    }

    pub fn day(self) -> u8 {
        (self.0 / MINUTES_PER_DAY) as u8
    }

    pub fn hour(self) -> u8 {
        ((self.0 / 60) % 24) as u8
    }

    pub fn minute(self) -> u8 {
        (self.0 % 60) as u8
    }

    pub fn ser(self, buf: &mut impl BufMut) {
        buf.put_u8(self.day());
        buf.put_u8(self.hour());
        buf.put_u8(self.minute());
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<WeekTime> {
        let day = buf.try_get_u8()?;
        let hour = buf.try_get_u8()?;
        let minute = buf.try_get_u8()?;
        Self::try_from_parts(day, hour, minute)
    }
}

impl Display for WeekTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.0 == MINUTES_PER_WEEK {
            return write!(f, "Sun 24:00");
        }
        write!(f, "{} {:02}:{:02}", DAY_NAMES[self.day() as usize], self.hour(), self.minute())
    }
}

impl Debug for WeekTime {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self)
    }
}

/// A maximal free run `[start, end)` in a facility's calendar.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub struct FreeInterval {
    pub start: WeekTime,
    pub end: WeekTime,
}

impl FreeInterval {
    pub fn ser(&self, buf: &mut impl BufMut) {
        self.start.ser(buf);
        self.end.ser(buf);
    }

    pub fn try_deser(buf: &mut impl Buf) -> anyhow::Result<FreeInterval> {
        let start = WeekTime::try_deser(buf)?;
        let end = WeekTime::try_deser(buf)?;
        Ok(FreeInterval { start, end })
    }
}

impl Display for FreeInterval {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // an end on a day boundary reads more naturally as 24:00 of the
        //  previous day, e.g. "Mon 11:00 - Mon 24:00"
        let end = self.end.minutes();
        if end > 0 && end % MINUTES_PER_DAY == 0 {
            let day = (end / MINUTES_PER_DAY - 1) as usize;
            return write!(f, "{} - {} 24:00", self.start, DAY_NAMES[day]);
        }
        write!(f, "{} - {}", self.start, self.end)
    }
}
