// Plot file I/O

pub mod codec;

pub use codec::{
    decode, encode, from_json_str, load_plot, save_plot, to_json_string, CodecError, DecodedDocument,
    STATE_MARKER,
};
