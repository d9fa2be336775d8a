//! Byte sources and binary value readers/writers.
//!
//! [`DataReaderTrait`] is the random-access contract the rest of the crate
//! is built on: read a byte range, learn the total size, and surface the
//! validator (ETag) the origin attached to the response. Implementations
//! exist for local files and for HTTP(S) endpoints with range support.

mod data_reader;
mod data_reader_file;
mod data_reader_http;
mod value_reader;
mod value_writer;

pub use data_reader::{DataReader, DataReaderTrait, RangeResponse};
pub use data_reader_file::DataReaderFile;
pub use data_reader_http::DataReaderHttp;
pub use value_reader::ValueReaderSlice;
pub use value_writer::ValueWriterBlob;
