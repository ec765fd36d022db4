//! HTTP request handlers organized by functionality

pub mod probe;
pub mod range;
pub mod sessions;
pub mod stream;

pub use probe::{ProbeQuery, probe_media};
pub use range::{ByteRange, parse_range_header};
pub use sessions::create_session;
pub use stream::stream_file;
