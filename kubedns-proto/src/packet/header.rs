use crate::buffer::{reader::ReaderError, writer::WriterError, BytePacketBuffer};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ResponseCode {
    /// No error condition
    NoError = 0,
    /// Format error - The name server was unable to interpret the query.
    FormatError = 1,
    /// Server failure - The name server was unable to process this query due to a problem with the name server.
    ServerFailure = 2,
    /// Name Error - Meaningful only for responses from an authoritative name server,
    /// this code signifies that the domain name referenced in the query does not exist.
    /// Previously named NXDOMAIN.
    NameError = 3,
    /// Not Implemented - The name server does not support the requested kind of query.
    NotImplemented = 4,
    /// Refused - The name server refuses to perform the specified operation for policy reasons.
    Refused = 5,
}

impl ResponseCode {
    pub fn from_num(num: u8) -> ResponseCode {
        match num {
            1 => ResponseCode::FormatError,
            2 => ResponseCode::ServerFailure,
            3 => ResponseCode::NameError,
            4 => ResponseCode::NotImplemented,
            5 => ResponseCode::Refused,
            _ => ResponseCode::NoError,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Header {
    /// A 16 bit identifier assigned by the program that generates any
    /// kind of query. Copied into the response so the requester can
    /// match up replies to outstanding queries.
    pub id: u16,

    /// RD Recursion Desired - copied into the response.
    pub recursion_desired: bool,
    /// TC TrunCation.
    pub truncated_message: bool,
    /// AA Authoritative Answer.
    pub authoritative_answer: bool,
    /// OPCODE, 4 bits. 0 = standard query.
    pub opcode: u8,
    /// QR - query (false) or response (true).
    pub response: bool,

    pub response_code: ResponseCode,
    pub checking_disabled: bool,
    pub authed_data: bool,
    /// Z - reserved, must be zero.
    pub z: bool,
    /// RA Recursion Available.
    pub recursion_available: bool,

    pub questions: u16,
    pub answers: u16,
    pub authoritative_entries: u16,
    pub resource_entries: u16,
}

impl Default for Header {
    fn default() -> Self {
        Self {
            id: 0,
            recursion_desired: false,
            truncated_message: false,
            authoritative_answer: false,
            opcode: 0,
            response: false,
            response_code: ResponseCode::NoError,
            checking_disabled: false,
            authed_data: false,
            z: false,
            recursion_available: false,
            questions: 0,
            answers: 0,
            authoritative_entries: 0,
            resource_entries: 0,
        }
    }
}

impl Header {
    /// A plain recursive query header, as sent by a client.
    pub fn question(id: u16) -> Self {
        Self {
            id,
            recursion_desired: true,
            ..Default::default()
        }
    }

    /// An authoritative, recursion-available response header.
    pub fn response(id: u16) -> Self {
        Self {
            id,
            response: true,
            authoritative_answer: true,
            recursion_available: true,
            ..Default::default()
        }
    }

    pub fn read(buffer: &mut BytePacketBuffer) -> Result<Self, ReaderError> {
        let id = buffer.read_u16()?;

        let flags = buffer.read_u16()?;
        let head = (flags >> 8) as u8;
        let tail = (flags & 0xFF) as u8;

        let questions = buffer.read_u16()?;
        let answers = buffer.read_u16()?;
        let authoritative_entries = buffer.read_u16()?;
        let resource_entries = buffer.read_u16()?;

        Ok(Self {
            id,
            recursion_desired: (head & (1 << 0)) > 0,
            truncated_message: (head & (1 << 1)) > 0,
            authoritative_answer: (head & (1 << 2)) > 0,
            opcode: (head >> 3) & 0x0F,
            response: (head & (1 << 7)) > 0,
            response_code: ResponseCode::from_num(tail & 0x0F),
            checking_disabled: (tail & (1 << 4)) > 0,
            authed_data: (tail & (1 << 5)) > 0,
            z: (tail & (1 << 6)) > 0,
            recursion_available: (tail & (1 << 7)) > 0,
            questions,
            answers,
            authoritative_entries,
            resource_entries,
        })
    }

    pub fn write(&self, buffer: &mut BytePacketBuffer) -> Result<(), WriterError> {
        buffer.write_u16(self.id)?;

        buffer.write_u8(
            (self.recursion_desired as u8)
                | ((self.truncated_message as u8) << 1)
                | ((self.authoritative_answer as u8) << 2)
                | (self.opcode << 3)
                | ((self.response as u8) << 7),
        )?;

        buffer.write_u8(
            (self.response_code as u8)
                | ((self.checking_disabled as u8) << 4)
                | ((self.authed_data as u8) << 5)
                | ((self.z as u8) << 6)
                | ((self.recursion_available as u8) << 7),
        )?;

        buffer.write_u16(self.questions)?;
        buffer.write_u16(self.answers)?;
        buffer.write_u16(self.authoritative_entries)?;
        buffer.write_u16(self.resource_entries)?;

        Ok(())
    }
}

/// Rewrite the 16 bit message ID of an already-packed wire message
/// in place, at offset 0, big-endian. Used on the cache hit path to
/// avoid re-packing (and therefore re-allocating) the response.
pub fn update_message_id(buffer: &mut [u8], id: u16) {
    if buffer.len() < 2 {
        return;
    }
    buffer[0] = (id >> 8) as u8;
    buffer[1] = (id & 0xFF) as u8;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_round_trip_header() {
        let header = Header {
            id: 42,
            recursion_desired: true,
            authoritative_answer: true,
            response: true,
            response_code: ResponseCode::NameError,
            questions: 1,
            answers: 2,
            ..Default::default()
        };
        let mut buffer = BytePacketBuffer::default();
        header.write(&mut buffer).unwrap();
        buffer.pos = 0;
        let read_back = Header::read(&mut buffer).unwrap();
        assert_eq!(read_back, header);
    }

    #[test]
    fn should_update_message_id_in_place() {
        let mut wire = [0x00, 0x01, 0xFF, 0xFF];
        update_message_id(&mut wire, 0xBEEF);
        assert_eq!(&wire[0..2], &[0xBE, 0xEF]);
        assert_eq!(&wire[2..4], &[0xFF, 0xFF]);
    }
}
