use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use tracing::info;

/// Lazily yields the raw lines of stdin or of a list of files, in order.
///
/// Lines are yielded as bytes without their terminator, invalid UTF-8
/// included, so a corrupt line fails to decode on its own instead of ending
/// the stream. Files are opened one after the other when the previous one is
/// exhausted. Files ending in `.gz` are decompressed on the fly. The stream
/// ends after the first read error, which is yielded as the last item.
pub struct RecordStream {
    pending: VecDeque<PathBuf>,
    current: Option<Box<dyn BufRead>>,
    buf: Vec<u8>,
    failed: bool,
}

impl RecordStream {
    pub fn stdin() -> Self {
        Self {
            pending: VecDeque::new(),
            current: Some(Box::new(BufReader::new(io::stdin()))),
            buf: Vec::new(),
            failed: false,
        }
    }

    pub fn files(paths: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            pending: paths.into_iter().collect(),
            current: None,
            buf: Vec::new(),
            failed: false,
        }
    }

    #[cfg(test)]
    pub fn from_reader(reader: impl BufRead + 'static) -> Self {
        Self {
            pending: VecDeque::new(),
            current: Some(Box::new(reader)),
            buf: Vec::new(),
            failed: false,
        }
    }

    fn open(path: &Path) -> io::Result<Box<dyn BufRead>> {
        let file = File::open(path).map_err(|e| {
            io::Error::new(e.kind(), format!("failed to open {}: {}", path.display(), e))
        })?;
        info!("reading records from {}", path.display());
        if path.extension().map_or(false, |ext| ext == "gz") {
            Ok(Box::new(BufReader::new(MultiGzDecoder::new(file))))
        } else {
            Ok(Box::new(BufReader::new(file)))
        }
    }
}

impl Iterator for RecordStream {
    type Item = io::Result<Vec<u8>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if self.current.is_none() {
                let path = self.pending.pop_front()?;
                match Self::open(&path) {
                    Ok(reader) => self.current = Some(reader),
                    Err(e) => {
                        self.failed = true;
                        return Some(Err(e));
                    }
                }
            }
            let reader = match self.current.as_mut() {
                Some(reader) => reader,
                None => continue,
            };

            self.buf.clear();
            match reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => {
                    // EOF
                    self.current = None;
                }
                Ok(_) => {
                    let mut line = self.buf.as_slice();
                    if let Some(rest) = line.strip_suffix(b"\n") {
                        line = rest;
                    }
                    if let Some(rest) = line.strip_suffix(b"\r") {
                        line = rest;
                    }
                    return Some(Ok(line.to_vec()));
                }
                Err(e) => {
                    self.failed = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::RecordStream;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::fs::File;
    use std::io::{Cursor, Write};

    fn text(stream: RecordStream) -> Vec<String> {
        stream
            .map(|l| String::from_utf8(l.unwrap()).unwrap())
            .collect()
    }

    #[test]
    fn lines_without_terminators() {
        let stream = RecordStream::from_reader(Cursor::new("a\r\nb\n\nc"));
        assert_eq!(text(stream), vec!["a", "b", "", "c"]);
    }

    #[test]
    fn invalid_utf8_line_does_not_end_stream() {
        let stream = RecordStream::from_reader(Cursor::new(b"a\n\xff\xfe x\nb\n".to_vec()));
        let lines: Vec<Vec<u8>> = stream.map(|l| l.unwrap()).collect();
        assert_eq!(
            lines,
            vec![b"a".to_vec(), b"\xff\xfe x".to_vec(), b"b".to_vec()]
        );
    }

    #[test]
    fn empty_input_is_empty_stream() {
        let mut stream = RecordStream::from_reader(Cursor::new(""));
        assert!(stream.next().is_none());
    }

    #[test]
    fn files_are_concatenated_and_gunzipped() {
        let dir = tempfile::tempdir().unwrap();
        let plain = dir.path().join("one.jsonl");
        std::fs::write(&plain, "1\n2\n").unwrap();

        let gz = dir.path().join("two.jsonl.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"3\n4\n").unwrap();
        encoder.finish().unwrap();

        let stream = RecordStream::files(vec![plain, gz]);
        assert_eq!(text(stream), vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn missing_file_ends_stream_with_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut stream = RecordStream::files(vec![dir.path().join("nope.jsonl")]);
        assert!(stream.next().unwrap().is_err());
        assert!(stream.next().is_none());
    }
}
