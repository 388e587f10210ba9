pub mod raw;

pub use raw::{parse_hex_frame, RawFrame, RawFrameCodec};
