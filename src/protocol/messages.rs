//! Message schema: one operation code per byte, requests carrying a `u32`
//! request id right after the code, replies and callbacks carrying none.

use anyhow::anyhow;
use bytes::{Buf, BufMut, BytesMut};
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::protocol::time::{FreeInterval, WeekTime};
use crate::protocol::wire::{put_list, put_string, try_get_list, try_get_string};

pub const OP_QUERY: u8 = 1;
pub const OP_BOOK: u8 = 2;
pub const OP_CHANGE: u8 = 3;
pub const OP_MONITOR_REGISTER: u8 = 4;
pub const OP_EXTEND: u8 = 5;
pub const OP_CANCEL: u8 = 6;
pub const OP_MONITOR_UPDATE: u8 = 7;
pub const OP_ERROR: u8 = 0xFF;

/// Error byte carried inside an `ERROR` reply.
#[derive(Clone, Copy, Eq, PartialEq, Debug, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorCode {
    NotFound = 1,
    InvalidTime = 2,
    Conflict = 3,
    Cancelled = 4,
    Malformed = 5,
    UnknownOp = 6,
    Internal = 7,
}

/// Why an incoming request could not be decoded. The dispatcher replies
/// `UNKNOWN_OP` for the first variant and `MALFORMED` for the second; neither
/// reply is ever cached.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown operation code {0}")]
    UnknownOp(u8),
    #[error("malformed datagram: {0}")]
    Malformed(anyhow::Error),
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Request {
    pub id: u32,
    pub op: RequestOp,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum RequestOp {
    Query { facility: String, days: Vec<u8> },
    Book { facility: String, start: WeekTime, end: WeekTime },
    Change { confirmation_id: String, offset_minutes: i32 },
    MonitorRegister { facility: String, duration_secs: u32 },
    Extend { confirmation_id: String, extra_minutes: u32 },
    Cancel { confirmation_id: String },
}

impl RequestOp {
    pub fn code(&self) -> u8 {
        match self {
            RequestOp::Query { .. } => OP_QUERY,
            RequestOp::Book { .. } => OP_BOOK,
            RequestOp::Change { .. } => OP_CHANGE,
            RequestOp::MonitorRegister { .. } => OP_MONITOR_REGISTER,
            RequestOp::Extend { .. } => OP_EXTEND,
            RequestOp::Cancel { .. } => OP_CANCEL,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            RequestOp::Query { .. } => "QUERY",
            RequestOp::Book { .. } => "BOOK",
            RequestOp::Change { .. } => "CHANGE",
            RequestOp::MonitorRegister { .. } => "MONITOR-REGISTER",
            RequestOp::Extend { .. } => "EXTEND",
            RequestOp::Cancel { .. } => "CANCEL",
        }
    }
}

impl Request {
    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.op.code());
        buf.put_u32(self.id);
        match &self.op {
            RequestOp::Query { facility, days } => {
                put_string(buf, facility);
                put_list(buf, days, |b, d| b.put_u8(*d));
            }
            RequestOp::Book { facility, start, end } => {
                put_string(buf, facility);
                start.ser(buf);
                end.ser(buf);
            }
            RequestOp::Change { confirmation_id, offset_minutes } => {
                put_string(buf, confirmation_id);
                buf.put_i32(*offset_minutes);
            }
            RequestOp::MonitorRegister { facility, duration_secs } => {
                put_string(buf, facility);
                buf.put_u32(*duration_secs);
            }
            RequestOp::Extend { confirmation_id, extra_minutes } => {
                put_string(buf, confirmation_id);
                buf.put_u32(*extra_minutes);
            }
            RequestOp::Cancel { confirmation_id } => {
                put_string(buf, confirmation_id);
            }
        }
    }

    pub fn deser(buf: &[u8]) -> Result<Request, DecodeError> {
        let mut buf = buf;
        let code = buf.try_get_u8().map_err(|e| DecodeError::Malformed(e.into()))?;
        if !(OP_QUERY..=OP_CANCEL).contains(&code) {
            return Err(DecodeError::UnknownOp(code));
        }
        let id = buf.try_get_u32().map_err(|e| DecodeError::Malformed(e.into()))?;
        let op = Self::deser_op(code, &mut buf).map_err(DecodeError::Malformed)?;
        if buf.has_remaining() {
            return Err(DecodeError::Malformed(anyhow!("trailing bytes after message")));
        }
        Ok(Request { id, op })
    }

    fn deser_op(code: u8, buf: &mut &[u8]) -> anyhow::Result<RequestOp> {
        match code {
            OP_QUERY => {
                let facility = try_get_string(buf)?;
                let days = try_get_list(buf, |b| {
                    let day = b.try_get_u8()?;
                    if day > 6 {
                        return Err(anyhow!("day {} out of range", day));
                    }
                    Ok(day)
                })?;
                Ok(RequestOp::Query { facility, days })
            }
            OP_BOOK => {
                let facility = try_get_string(buf)?;
                let start = WeekTime::try_deser(buf)?;
                let end = WeekTime::try_deser(buf)?;
                Ok(RequestOp::Book { facility, start, end })
            }
            OP_CHANGE => {
                let confirmation_id = try_get_string(buf)?;
                // two's complement: the i32 comes off the wire as its u32 bits
                let offset_minutes = buf.try_get_u32()? as i32;
                Ok(RequestOp::Change { confirmation_id, offset_minutes })
            }
            OP_MONITOR_REGISTER => {
                let facility = try_get_string(buf)?;
                let duration_secs = buf.try_get_u32()?;
                Ok(RequestOp::MonitorRegister { facility, duration_secs })
            }
            OP_EXTEND => {
                let confirmation_id = try_get_string(buf)?;
                let extra_minutes = buf.try_get_u32()?;
                Ok(RequestOp::Extend { confirmation_id, extra_minutes })
            }
            OP_CANCEL => {
                let confirmation_id = try_get_string(buf)?;
                Ok(RequestOp::Cancel { confirmation_id })
            }
            _ => Err(anyhow!("invalid request code {}", code)),
        }
    }
}

/// Server-originated messages: replies reuse their request's operation code,
/// `MONITOR-UPDATE` is unsolicited, `ERROR` carries a code byte and a detail.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum Reply {
    Availability(Vec<FreeInterval>),
    Booked { confirmation_id: String },
    Changed,
    MonitorRegistered,
    Extended,
    Cancelled,
    MonitorUpdate { facility: String, free: Vec<FreeInterval> },
    Error { code: ErrorCode, detail: String },
}

impl Reply {
    pub fn code(&self) -> u8 {
        match self {
            Reply::Availability(_) => OP_QUERY,
            Reply::Booked { .. } => OP_BOOK,
            Reply::Changed => OP_CHANGE,
            Reply::MonitorRegistered => OP_MONITOR_REGISTER,
            Reply::Extended => OP_EXTEND,
            Reply::Cancelled => OP_CANCEL,
            Reply::MonitorUpdate { .. } => OP_MONITOR_UPDATE,
            Reply::Error { .. } => OP_ERROR,
        }
    }

    pub fn ser(&self, buf: &mut BytesMut) {
        buf.put_u8(self.code());
        match self {
            Reply::Availability(free) => {
                put_list(buf, free, |b, interval| interval.ser(b));
            }
            Reply::Booked { confirmation_id } => {
                put_string(buf, confirmation_id);
            }
            Reply::Changed | Reply::MonitorRegistered | Reply::Extended | Reply::Cancelled => {}
            Reply::MonitorUpdate { facility, free } => {
                put_string(buf, facility);
                put_list(buf, free, |b, interval| interval.ser(b));
            }
            Reply::Error { code, detail } => {
                buf.put_u8(*code as u8);
                put_string(buf, detail);
            }
        }
    }

    pub fn deser(buf: &[u8]) -> anyhow::Result<Reply> {
        let mut buf = buf;
        let code = buf.try_get_u8()?;
        let reply = match code {
            OP_QUERY => Reply::Availability(try_get_list(&mut buf, FreeInterval::try_deser)?),
            OP_BOOK => Reply::Booked { confirmation_id: try_get_string(&mut buf)? },
            OP_CHANGE => Reply::Changed,
            OP_MONITOR_REGISTER => Reply::MonitorRegistered,
            OP_EXTEND => Reply::Extended,
            OP_CANCEL => Reply::Cancelled,
            OP_MONITOR_UPDATE => Reply::MonitorUpdate {
                facility: try_get_string(&mut buf)?,
                free: try_get_list(&mut buf, FreeInterval::try_deser)?,
            },
            OP_ERROR => Reply::Error {
                code: ErrorCode::try_from_primitive(buf.try_get_u8()?)?,
                detail: try_get_string(&mut buf)?,
            },
            code => return Err(anyhow!("invalid reply code {}", code)),
        };
        if buf.has_remaining() {
            return Err(anyhow!("trailing bytes after message"));
        }
        Ok(reply)
    }
}
