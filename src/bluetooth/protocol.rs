// Copyright 2026 Daniel Pelikan
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Line protocol spoken over the serial channel.
//!
//! Every application message is a single line terminated by CR LF. The first
//! line after connecting is the sync preamble:
//!
//! ```text
//! SYNC from <local-name> <local-address>\r\n
//! ```

use tokio::io::{AsyncWrite, AsyncWriteExt};
use uuid::Uuid;

use super::address::Address;

/// Standard SPP UUID.
pub const SPP_UUID: Uuid = Uuid::from_u128(0x00001101_0000_1000_8000_00805F9B34FB);

/// Line terminator appended to every message.
pub const LINE_TERMINATOR: &[u8] = b"\r\n";

/// Prefix of the sync preamble.
pub const SYNC_PREFIX: &str = "SYNC from ";

/// Frame a message as one wire line.
pub fn frame_line(message: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(message.len() + LINE_TERMINATOR.len());
    line.extend_from_slice(message.as_bytes());
    line.extend_from_slice(LINE_TERMINATOR);
    line
}

/// Body of the sync preamble (without terminator).
pub fn sync_message(local_name: &str, local_address: &Address) -> String {
    format!("{}{} {}", SYNC_PREFIX, local_name, local_address)
}

/// Strip a trailing CR LF (or bare LF) from a received line.
pub fn strip_terminator(line: &str) -> &str {
    let line = line.strip_suffix('\n').unwrap_or(line);
    line.strip_suffix('\r').unwrap_or(line)
}

/// Parse a sync preamble into the sender's name and address.
///
/// The name may contain spaces; the address is always the last field.
pub fn parse_sync(line: &str) -> Option<(&str, Address)> {
    let body = strip_terminator(line).strip_prefix(SYNC_PREFIX)?;
    let (name, address) = body.rsplit_once(' ')?;
    Some((name, address.parse().ok()?))
}

/// Write one framed line and flush it immediately.
pub async fn write_line<W>(writer: &mut W, message: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    writer.write_all(&frame_line(message)).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_line() {
        assert_eq!(frame_line("A;B;C"), b"A;B;C\r\n".to_vec());
        assert_eq!(frame_line(""), b"\r\n".to_vec());
    }

    #[test]
    fn test_sync_message() {
        let addr: Address = "AA:BB:CC:00:11:22".parse().unwrap();
        assert_eq!(
            sync_message("galaxy", &addr),
            "SYNC from galaxy AA:BB:CC:00:11:22"
        );
    }

    #[test]
    fn test_parse_sync_with_spaced_name() {
        let (name, addr) = parse_sync("SYNC from My Phone 00:16:38:3A:3B:A8\r\n").unwrap();
        assert_eq!(name, "My Phone");
        assert_eq!(addr.to_string(), "00:16:38:3A:3B:A8");
    }

    #[test]
    fn test_parse_sync_rejects_other_lines() {
        assert!(parse_sync("1.0;2.0;3.0\r\n").is_none());
        assert!(parse_sync("SYNC from nobody").is_none());
    }

    #[test]
    fn test_strip_terminator() {
        assert_eq!(strip_terminator("abc\r\n"), "abc");
        assert_eq!(strip_terminator("abc\n"), "abc");
        assert_eq!(strip_terminator("abc"), "abc");
    }

    #[tokio::test]
    async fn test_write_line_flushes_each_message() {
        let (mut local, mut peer) = tokio::io::duplex(64);
        write_line(&mut local, "x=1").await.unwrap();
        write_line(&mut local, "x=2").await.unwrap();
        drop(local);

        let mut received = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut peer, &mut received)
            .await
            .unwrap();
        assert_eq!(received, b"x=1\r\nx=2\r\n");
    }
}
