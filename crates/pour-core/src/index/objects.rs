//! Allocation-light splitting of a JSON object stream.
//!
//! Finds the byte boundaries of each top-level `{...}` in either a bare
//! `obj,obj` stream or a bracketed `[obj,obj]` array, without decoding
//! anything. Depth counting ignores braces inside string literals, including
//! backslash-escaped ones. Whitespace, commas and brackets between objects are
//! skipped, and an object still open at end of input yields nothing.

use std::io::{self, Read};
use std::ops::Range;

const READ_CHUNK: usize = 64 * 1024;

/// Resumable boundary finder for one object at a time.
#[derive(Debug, Default, Clone)]
pub struct ObjectSplitter {
    pos: usize,
    open: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
}

impl ObjectSplitter {
    /// A splitter positioned at the start of its input.
    pub fn new() -> Self {
        Self::default()
    }

    /// Scan `data` for the end of the next object.
    ///
    /// `data` must start with the bytes seen by previous calls; only the
    /// unseen tail is examined. Returns the object's byte range once it is
    /// closed, after which the splitter should be [`reset`](Self::reset).
    pub fn scan(&mut self, data: &[u8]) -> Option<Range<usize>> {
        while self.pos < data.len() {
            let b = data[self.pos];
            self.pos += 1;

            let Some(start) = self.open else {
                if b == b'{' {
                    self.open = Some(self.pos - 1);
                    self.depth = 1;
                }
                continue;
            };

            if self.in_string {
                if self.escaped {
                    self.escaped = false;
                } else if b == b'\\' {
                    self.escaped = true;
                } else if b == b'"' {
                    self.in_string = false;
                }
                continue;
            }

            match b {
                b'"' => self.in_string = true,
                b'{' => self.depth += 1,
                b'}' => {
                    self.depth -= 1;
                    if self.depth == 0 {
                        return Some(start..self.pos);
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Forget all state, ready for fresh input.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Split an in-memory buffer into its top-level objects.
///
/// ```
/// use pour_core::index::objects::split_objects;
///
/// let objects = split_objects(b"[ {},    {{}}, ]");
/// assert_eq!(objects, vec![&b"{}"[..], &b"{{}}"[..]]);
/// ```
pub fn split_objects(data: &[u8]) -> Vec<&[u8]> {
    let mut out = Vec::new();
    let mut rest = data;
    let mut splitter = ObjectSplitter::new();
    while let Some(range) = splitter.scan(rest) {
        out.push(&rest[range.clone()]);
        rest = &rest[range.end..];
        splitter.reset();
    }
    out
}

/// One top-level object and where it sits in the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    /// Byte offset of the opening brace.
    pub offset: u64,
    /// The object's bytes, braces included.
    pub bytes: Vec<u8>,
}

/// Iterator over the top-level objects of a reader.
#[derive(Debug)]
pub struct ObjectScanner<R> {
    reader: R,
    buf: Vec<u8>,
    consumed: u64,
    splitter: ObjectSplitter,
    eof: bool,
}

impl<R: Read> ObjectScanner<R> {
    /// Scan `reader` from its current position.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(READ_CHUNK),
            consumed: 0,
            splitter: ObjectSplitter::new(),
            eof: false,
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let len = self.buf.len();
        self.buf.resize(len + READ_CHUNK, 0);
        let n = loop {
            match self.reader.read(&mut self.buf[len..]) {
                Ok(n) => break n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => {
                    self.buf.truncate(len);
                    return Err(e);
                }
            }
        };
        self.buf.truncate(len + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

impl<R: Read> Iterator for ObjectScanner<R> {
    type Item = io::Result<RawObject>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(range) = self.splitter.scan(&self.buf) {
                let object = RawObject {
                    offset: self.consumed + range.start as u64,
                    bytes: self.buf[range.clone()].to_vec(),
                };
                self.buf.drain(..range.end);
                self.consumed += range.end as u64;
                self.splitter.reset();
                return Some(Ok(object));
            }
            if self.eof {
                return None;
            }
            if let Err(e) = self.fill() {
                return Some(Err(e));
            }
        }
    }
}

/// Extract a string value stored under `key` at the top level of one object,
/// without decoding the rest of it.
///
/// Returns `None` when the key is absent, nested, or not a plain string.
pub fn top_level_string<'a>(object: &'a [u8], key: &str) -> Option<&'a str> {
    let mut depth = 0usize;
    let mut i = 0;
    while i < object.len() {
        match object[i] {
            b'{' | b'[' => depth += 1,
            b'}' | b']' => depth = depth.saturating_sub(1),
            b'"' => {
                let end = string_end(object, i)?;
                if depth == 1 && &object[i + 1..end] == key.as_bytes() {
                    let mut j = skip_whitespace(object, end + 1);
                    if object.get(j) == Some(&b':') {
                        j = skip_whitespace(object, j + 1);
                        if object.get(j) != Some(&b'"') {
                            return None;
                        }
                        let value_end = string_end(object, j)?;
                        return std::str::from_utf8(&object[j + 1..value_end]).ok();
                    }
                }
                i = end;
            }
            _ => {}
        }
        i += 1;
    }
    None
}

fn string_end(data: &[u8], open: usize) -> Option<usize> {
    let mut i = open + 1;
    while i < data.len() {
        match data[i] {
            b'\\' => i += 2,
            b'"' => return Some(i),
            _ => i += 1,
        }
    }
    None
}

fn skip_whitespace(data: &[u8], mut i: usize) -> usize {
    while data.get(i).is_some_and(u8::is_ascii_whitespace) {
        i += 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_str(src: &str) -> Vec<String> {
        split_objects(src.as_bytes())
            .into_iter()
            .map(|b| String::from_utf8(b.to_vec()).unwrap())
            .collect()
    }

    #[test]
    fn test_split_cases() {
        let cases: &[(&str, &[&str])] = &[
            ("[{},{{}}]", &["{}", "{{}}"]),
            (r#"[{},{"f":"\}"}]"#, &["{}", r#"{"f":"\}"}"#]),
            ("[ {},    {{}}, ]", &["{}", "{{}}"]),
            ("{},{{}}", &["{}", "{{}}"]),
            ("[{},{{", &["{}"]),
        ];
        for (src, want) in cases {
            assert_eq!(split_str(src), *want, "input: {src}");
        }
    }

    #[test]
    fn test_unbalanced_brace_inside_string() {
        assert_eq!(
            split_str(r#"[{"desc":"a { b"},{"x":1}]"#),
            vec![r#"{"desc":"a { b"}"#, r#"{"x":1}"#]
        );
    }

    #[test]
    fn test_scanner_matches_in_memory_split() {
        let mut src = String::from("[");
        for i in 0..5000 {
            if i > 0 {
                src.push(',');
            }
            src.push_str(&format!(r#"{{"name":"f{i}","nested":{{"k":"}}"}}}}"#));
        }
        src.push(']');

        let streamed: Vec<RawObject> = ObjectScanner::new(src.as_bytes())
            .collect::<io::Result<_>>()
            .unwrap();
        let in_memory = split_objects(src.as_bytes());

        assert_eq!(streamed.len(), 5000);
        for (raw, slice) in streamed.iter().zip(&in_memory) {
            assert_eq!(raw.bytes.as_slice(), *slice);
            let start = raw.offset as usize;
            assert_eq!(&src.as_bytes()[start..start + raw.bytes.len()], *slice);
        }
    }

    #[test]
    fn test_top_level_string() {
        let obj = br#"{"requirements":[{"name":"nested"}], "name" : "ruby","full_name":"ruby"}"#;
        assert_eq!(top_level_string(obj, "name"), Some("ruby"));
        assert_eq!(top_level_string(obj, "missing"), None);
        assert_eq!(top_level_string(br#"{"name":3}"#, "name"), None);
    }
}
