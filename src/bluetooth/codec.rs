// Copyright 2026 RelayLink Contributors
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

//! Single-byte command alphabet shared with the relay firmware.
//!
//! Lowercase `a`-`h` switches appliance 1-8 ON, uppercase `A`-`H` switches
//! it OFF. The same alphabet is used in both directions: the board echoes
//! its actual state using the same letters.

/// Number of appliance channels on the relay board.
pub const APPLIANCE_COUNT: u8 = 8;

/// Encode an outbound command for an appliance (1-8).
///
/// Callers must range-check the appliance number; the wire alphabet only
/// covers eight channels.
pub fn encode_command(appliance: u8, turn_on: bool) -> u8 {
    debug_assert!((1..=APPLIANCE_COUNT).contains(&appliance));
    if turn_on {
        b'a' + (appliance - 1)
    } else {
        b'A' + (appliance - 1)
    }
}

/// Decode one inbound status byte into `(appliance, is_on)`.
///
/// Bytes outside the command alphabet are ignored, not errors.
pub fn decode_byte(byte: u8) -> Option<(u8, bool)> {
    match byte {
        b'A'..=b'H' => Some((byte - b'A' + 1, false)),
        b'a'..=b'h' => Some((byte - b'a' + 1, true)),
        _ => None,
    }
}

/// Decode every recognized byte in an inbound chunk, in order.
pub fn decode_chunk(chunk: &[u8]) -> impl Iterator<Item = (u8, bool)> + '_ {
    chunk.iter().filter_map(|&byte| decode_byte(byte))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_on_off() {
        assert_eq!(encode_command(1, true), b'a');
        assert_eq!(encode_command(1, false), b'A');
        assert_eq!(encode_command(8, true), b'h');
        assert_eq!(encode_command(8, false), b'H');
        for n in 1..=APPLIANCE_COUNT {
            assert_eq!(encode_command(n, true), b'a' + (n - 1));
            assert_eq!(encode_command(n, false), b'A' + (n - 1));
        }
    }

    #[test]
    fn test_decode_round_trip() {
        for n in 1..=APPLIANCE_COUNT {
            for on in [true, false] {
                assert_eq!(decode_byte(encode_command(n, on)), Some((n, on)));
            }
        }
    }

    #[test]
    fn test_decode_ignores_unknown_bytes() {
        for byte in [b'Z', b'i', b'0', b' ', b'\n', 0u8, 0xFF] {
            assert_eq!(decode_byte(byte), None);
        }
    }

    #[test]
    fn test_decode_chunk_in_order() {
        let updates: Vec<_> = decode_chunk(b"aC\r\nh").collect();
        assert_eq!(updates, vec![(1, true), (3, false), (8, true)]);
    }
}
