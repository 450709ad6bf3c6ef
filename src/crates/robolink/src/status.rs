use std::io::BufRead;

use crate::error::{LinkError, LinkResult};
use crate::wire;

/// Result classifier the engine sends after every command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Ok,
    InvalidItem,
    /// Followed by a message line; the connection stays usable.
    SoftFailure,
    /// Followed by a message line.
    HardFailure,
    Licensing,
    /// Any other value in `1..=9`.
    Unknown(i32),
}

impl StatusCode {
    /// Classify a raw status. Values outside `0..=9` are a protocol violation.
    pub fn from_wire(code: i32) -> LinkResult<Self> {
        match code {
            0 => Ok(StatusCode::Ok),
            1 => Ok(StatusCode::InvalidItem),
            2 => Ok(StatusCode::SoftFailure),
            3 => Ok(StatusCode::HardFailure),
            9 => Ok(StatusCode::Licensing),
            4..=8 => Ok(StatusCode::Unknown(code)),
            other => Err(LinkError::protocol(format!("status code {other} out of range"))),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            StatusCode::Ok => 0,
            StatusCode::InvalidItem => 1,
            StatusCode::SoftFailure => 2,
            StatusCode::HardFailure => 3,
            StatusCode::Licensing => 9,
            StatusCode::Unknown(code) => code,
        }
    }

    /// Whether a message line follows the code on the wire.
    pub fn carries_message(self) -> bool {
        matches!(self, StatusCode::SoftFailure | StatusCode::HardFailure)
    }
}

/// Read one status code (and its message, if any) and map failures to errors.
pub fn read_status<R: BufRead>(r: &mut R) -> LinkResult<()> {
    let status = StatusCode::from_wire(wire::read_i32(r)?)?;
    match status {
        StatusCode::Ok => Ok(()),
        StatusCode::InvalidItem => Err(LinkError::InvalidItem),
        StatusCode::SoftFailure => Err(LinkError::RemoteSoftFailure(wire::read_line(r)?)),
        StatusCode::HardFailure => Err(LinkError::RemoteHardFailure(wire::read_line(r)?)),
        StatusCode::Licensing => Err(LinkError::Licensing),
        StatusCode::Unknown(code) => Err(LinkError::UnknownStatus(code)),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read};

    use super::*;

    fn frame(code: i32, message: Option<&str>) -> Vec<u8> {
        let mut out = Vec::new();
        wire::write_i32(&mut out, code).unwrap();
        if let Some(message) = message {
            wire::write_line(&mut out, message).unwrap();
        }
        out
    }

    #[test]
    fn ok_status_consumes_only_the_code() {
        let mut input = Cursor::new(frame(0, Some("next")));
        read_status(&mut input).unwrap();
        assert_eq!(wire::read_line(&mut input).unwrap(), "next");
    }

    #[test]
    fn soft_failure_carries_exact_message() {
        let mut input = Cursor::new(frame(2, Some("Target not reachable")));
        match read_status(&mut input) {
            Err(LinkError::RemoteSoftFailure(msg)) => assert_eq!(msg, "Target not reachable"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn hard_failure_reads_message() {
        let mut input = Cursor::new(frame(3, Some("boom")));
        assert!(matches!(
            read_status(&mut input),
            Err(LinkError::RemoteHardFailure(msg)) if msg == "boom"
        ));
    }

    #[test]
    fn invalid_item_leaves_following_bytes_unread() {
        let mut bytes = frame(1, None);
        bytes.extend_from_slice(b"tail");
        let mut input = Cursor::new(bytes);
        assert!(matches!(read_status(&mut input), Err(LinkError::InvalidItem)));
        let mut rest = String::new();
        input.read_to_string(&mut rest).unwrap();
        assert_eq!(rest, "tail");
    }

    #[test]
    fn licensing_and_unknown_codes() {
        assert!(matches!(
            read_status(&mut Cursor::new(frame(9, None))),
            Err(LinkError::Licensing)
        ));
        assert!(matches!(
            read_status(&mut Cursor::new(frame(5, None))),
            Err(LinkError::UnknownStatus(5))
        ));
    }

    #[test]
    fn out_of_range_codes_violate_protocol() {
        for code in [-1, 10, 42] {
            assert!(matches!(
                read_status(&mut Cursor::new(frame(code, None))),
                Err(LinkError::ProtocolViolation(_))
            ));
        }
    }

    #[test]
    fn wire_values_round_trip() {
        for code in 0..=9 {
            assert_eq!(StatusCode::from_wire(code).unwrap().to_wire(), code);
        }
    }
}
