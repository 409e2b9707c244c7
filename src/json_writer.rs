//! Minimal, allocation-avoiding JSON writer for the streaming renderer.
//!
//! Escapes and streams strings without building large intermediates, and
//! writes numbers via itoa/ryu. Multi-byte UTF-8 passes through unescaped;
//! only control characters and the two mandatory `\"` and `\\` sequences
//! are escaped.

pub(crate) struct JsonWriter {
    out: Vec<u8>,
}

impl JsonWriter {
    pub(crate) fn new() -> Self {
        Self { out: Vec::new() }
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            out: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.out
    }

    #[inline]
    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    #[inline]
    pub(crate) fn write_str(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
    }

    /// Writes a JSON-escaped string surrounded by quotes.
    pub(crate) fn write_quoted_str(&mut self, s: &str) {
        let bytes = s.as_bytes();
        let needs_escape = |b: u8| matches!(b, b'"' | b'\\') || b <= 0x1F;

        // Fast path: no escapes means quote + bytes + quote.
        if !bytes.iter().copied().any(needs_escape) {
            self.out.push(b'"');
            self.out.extend_from_slice(bytes);
            self.out.push(b'"');
            return;
        }

        const HEX: &[u8; 16] = b"0123456789ABCDEF";
        self.out.push(b'"');
        let mut run_start = 0usize;
        for (i, &b) in bytes.iter().enumerate() {
            if !needs_escape(b) {
                continue;
            }
            self.out.extend_from_slice(&bytes[run_start..i]);
            match b {
                b'"' => self.out.extend_from_slice(b"\\\""),
                b'\\' => self.out.extend_from_slice(b"\\\\"),
                b'\n' => self.out.extend_from_slice(b"\\n"),
                b'\r' => self.out.extend_from_slice(b"\\r"),
                b'\t' => self.out.extend_from_slice(b"\\t"),
                _ => {
                    let esc = [
                        b'\\',
                        b'u',
                        b'0',
                        b'0',
                        HEX[(b >> 4) as usize],
                        HEX[(b & 0x0F) as usize],
                    ];
                    self.out.extend_from_slice(&esc);
                }
            }
            run_start = i + 1;
        }
        self.out.extend_from_slice(&bytes[run_start..]);
        self.out.push(b'"');
    }

    #[inline]
    pub(crate) fn write_i64(&mut self, n: i64) {
        let mut buf = itoa::Buffer::new();
        self.write_str(buf.format(n));
    }

    #[inline]
    pub(crate) fn write_u64(&mut self, n: u64) {
        let mut buf = itoa::Buffer::new();
        self.write_str(buf.format(n));
    }

    #[inline]
    pub(crate) fn write_f32(&mut self, n: f32) {
        if n.is_finite() {
            let mut buf = ryu::Buffer::new();
            self.write_str(buf.format(n));
        } else {
            self.write_null();
        }
    }

    #[inline]
    pub(crate) fn write_f64(&mut self, n: f64) {
        if n.is_finite() {
            let mut buf = ryu::Buffer::new();
            self.write_str(buf.format(n));
        } else {
            self.write_null();
        }
    }

    #[inline]
    pub(crate) fn write_bool(&mut self, b: bool) {
        self.write_bytes(if b { b"true" } else { b"false" });
    }

    #[inline]
    pub(crate) fn write_null(&mut self) {
        self.write_bytes(b"null");
    }

    #[inline]
    pub(crate) fn comma(&mut self) {
        self.out.push(b',');
    }

    #[inline]
    pub(crate) fn open_object(&mut self) {
        self.out.push(b'{');
    }

    #[inline]
    pub(crate) fn close_object(&mut self) {
        self.out.push(b'}');
    }

    #[inline]
    pub(crate) fn open_array(&mut self) {
        self.out.push(b'[');
    }

    #[inline]
    pub(crate) fn close_array(&mut self) {
        self.out.push(b']');
    }

    #[inline]
    pub(crate) fn write_key(&mut self, key: &str) {
        self.write_quoted_str(key);
        self.out.push(b':');
    }
}
