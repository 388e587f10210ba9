use anyhow::{anyhow, Result};
use std::fmt;

use crate::api::courier::{Codec, ParseError};

/// An undecoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    pub bytes: Vec<u8>,
}

impl fmt::Display for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex: Vec<String> = self.bytes.iter().map(|b| format!("{b:02X}")).collect();
        write!(f, "{}", hex.join(" "))
    }
}

/// Codec that sends the same command frame every cycle and passes the response through
///
/// Useful for bringing up a new device before a proper protocol codec exists, and as the
/// codec behind the `ptalk` binary.
#[derive(Debug, Clone)]
pub struct RawFrameCodec {
    command: Vec<u8>,
    max_response_size: usize,
    min_response_size: usize,
}

impl RawFrameCodec {
    pub fn new(command: Vec<u8>, max_response_size: usize) -> Self {
        Self {
            command,
            max_response_size,
            min_response_size: 1,
        }
    }

    /// Reject responses shorter than `min` bytes
    pub fn with_min_response_size(mut self, min: usize) -> Self {
        self.min_response_size = min.max(1);
        self
    }

    pub fn command(&self) -> &[u8] {
        &self.command
    }
}

impl Codec for RawFrameCodec {
    type Event = RawFrame;

    fn next_command(&mut self) -> Vec<u8> {
        self.command.clone()
    }

    fn max_response_size(&self) -> usize {
        self.max_response_size
    }

    fn parse_response(&mut self, raw: &[u8]) -> Result<RawFrame, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }
        if raw.len() < self.min_response_size {
            return Err(ParseError::TooShort {
                got: raw.len(),
                need: self.min_response_size,
            });
        }
        Ok(RawFrame {
            bytes: raw.to_vec(),
        })
    }
}

/// Parse a frame written as hex, e.g. `"02 08 10 7F"`, `"0x02,0x08"` or `"0208107F"`
pub fn parse_hex_frame(text: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();

    for token in text
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
    {
        let digits = token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
            .unwrap_or(token);
        if digits.len() % 2 != 0 {
            return Err(anyhow!("Odd number of hex digits in '{token}'"));
        }
        for pair in digits.as_bytes().chunks(2) {
            let pair = std::str::from_utf8(pair)?;
            let byte = u8::from_str_radix(pair, 16)
                .map_err(|err| anyhow!("Invalid hex byte '{pair}' in '{token}': {err}"))?;
            bytes.push(byte);
        }
    }

    if bytes.is_empty() {
        return Err(anyhow!("Command frame is empty"));
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex_frame_formats() {
        assert_eq!(parse_hex_frame("02 08 10 7F").unwrap(), vec![0x02, 0x08, 0x10, 0x7F]);
        assert_eq!(parse_hex_frame("0x02,0x08").unwrap(), vec![0x02, 0x08]);
        assert_eq!(parse_hex_frame("0208107f").unwrap(), vec![0x02, 0x08, 0x10, 0x7F]);
    }

    #[test]
    fn test_parse_hex_frame_rejects_garbage() {
        assert!(parse_hex_frame("").is_err());
        assert!(parse_hex_frame("0").is_err());
        assert!(parse_hex_frame("zz").is_err());
    }

    #[test]
    fn test_raw_codec_parse() {
        let mut codec = RawFrameCodec::new(vec![0x02], 11).with_min_response_size(2);
        assert_eq!(codec.next_command(), vec![0x02]);
        assert_eq!(codec.max_response_size(), 11);

        assert!(matches!(codec.parse_response(&[]), Err(ParseError::Empty)));
        assert!(matches!(
            codec.parse_response(&[0x01]),
            Err(ParseError::TooShort { got: 1, need: 2 })
        ));

        let frame = codec.parse_response(&[0x01, 0xFA]).unwrap();
        assert_eq!(frame.to_string(), "01 FA");
    }
}
