// Copyright 2024 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::parse_header;
use crate::Error;
use crate::GpuCommand;
use crate::Result;
use crate::DWORD_SIZE;

/// One undecoded command of a command stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawCommand<'a> {
    /// Byte offset of the header in the stream.
    pub offset: usize,
    pub opcode: u16,
    /// Everything after the header dword.
    pub payload: &'a [u8],
}

impl RawCommand<'_> {
    /// Decodes the payload as `T`. The opcode is not checked.
    pub fn decode<T: GpuCommand>(&self) -> Result<T> {
        T::read_from_bytes(self.payload).map_err(|_| Error::BadPayload {
            name: T::NAME,
            expected: std::mem::size_of::<T>(),
            actual: self.payload.len(),
        })
    }

    /// Returns `true` if this is a `T` command.
    pub fn is<T: GpuCommand>(&self) -> bool {
        self.opcode == T::OPCODE
    }
}

/// Iterates over the commands of an encoded command stream.
pub struct CommandReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> CommandReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        CommandReader { data, offset: 0 }
    }
}

impl<'a> Iterator for CommandReader<'a> {
    type Item = Result<RawCommand<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        let offset = self.offset;
        let rest = &self.data[offset..];
        let Some(dw0) = rest.get(..DWORD_SIZE) else {
            // Stop after reporting the error once.
            self.offset = self.data.len();
            return Some(Err(Error::Malformed { offset }));
        };
        let dw0 = u32::from_le_bytes([dw0[0], dw0[1], dw0[2], dw0[3]]);
        let (opcode, dwords) = parse_header(dw0);
        let len = dwords * DWORD_SIZE;
        let Some(cmd) = rest.get(..len) else {
            self.offset = self.data.len();
            return Some(Err(Error::Malformed { offset }));
        };
        self.offset += len;
        Some(Ok(RawCommand {
            offset,
            opcode,
            payload: &cmd[DWORD_SIZE..],
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mi::MiStoreDataImm;
    use crate::mi::MI_BATCH_BUFFER_END;
    use crate::CommandBatch;

    #[test]
    fn walks_commands_in_order() {
        let mut batch = CommandBatch::new();
        batch.push(&MiStoreDataImm::new(0x1000, 42));
        batch.push_opcode(MI_BATCH_BUFFER_END);

        let cmds: Vec<_> = CommandReader::new(batch.as_bytes())
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(cmds.len(), 2);
        assert!(cmds[0].is::<MiStoreDataImm>());
        assert_eq!(cmds[0].offset, 0);
        let store: MiStoreDataImm = cmds[0].decode().unwrap();
        assert_eq!(store.address(), 0x1000);
        assert_eq!(store.data, 42);
        assert_eq!(cmds[1].opcode, MI_BATCH_BUFFER_END);
        assert!(cmds[1].payload.is_empty());
    }

    #[test]
    fn header_is_little_endian() {
        // MI_BATCH_BUFFER_END, one dword.
        let bytes = [0x00, 0x00, 0x00, 0x0a];
        let cmd = CommandReader::new(&bytes).next().unwrap().unwrap();
        assert_eq!(cmd.opcode, MI_BATCH_BUFFER_END);
        assert!(cmd.payload.is_empty());
    }

    #[test]
    fn truncated_stream_is_malformed() {
        let mut batch = CommandBatch::new();
        batch.push(&MiStoreDataImm::new(0x1000, 42));
        let bytes = &batch.as_bytes()[..batch.len() - 4];

        let mut reader = CommandReader::new(bytes);
        assert_eq!(reader.next(), Some(Err(Error::Malformed { offset: 0 })));
        assert_eq!(reader.next(), None);
    }

    #[test]
    fn decode_checks_payload_size() {
        let mut batch = CommandBatch::new();
        batch.push_opcode(crate::mi::MI_STORE_DATA_IMM);
        let cmd = CommandReader::new(batch.as_bytes())
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(
            cmd.decode::<MiStoreDataImm>(),
            Err(Error::BadPayload {
                name: "MI_STORE_DATA_IMM",
                expected: 12,
                actual: 0
            })
        );
    }
}
