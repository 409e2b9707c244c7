pub(crate) mod byte_cursor;
pub(crate) mod bytes;
pub(crate) mod time;
pub(crate) mod utf16;

pub(crate) use byte_cursor::ByteCursor;
