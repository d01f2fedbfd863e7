use std::fs::File;
use std::io::{BufRead, BufReader};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;

use crate::error::LoadError;

pub fn open_input(path: &Utf8Path) -> Result<Box<dyn BufRead>, LoadError> {
    let file = File::open(path.as_std_path())
        .map_err(|err| LoadError::Filesystem(format!("open {path}: {err}")))?;
    let mut reader = BufReader::new(file);
    let is_gzip = {
        let buf = reader
            .fill_buf()
            .map_err(|err| LoadError::Filesystem(format!("read {path}: {err}")))?;
        buf.len() >= 2 && buf[0] == 0x1f && buf[1] == 0x8b
    };
    if is_gzip {
        tracing::debug!(%path, "detected gzip input");
        Ok(Box::new(BufReader::new(MultiGzDecoder::new(reader))))
    } else {
        Ok(Box::new(reader))
    }
}

pub struct DecodedLines<R> {
    reader: R,
    buf: Vec<u8>,
}

/// Lines without their terminator. A line that is not valid UTF-8 is read as
/// Latin-1 instead of failing the stream.
pub fn decoded_lines<R: BufRead>(reader: R) -> DecodedLines<R> {
    DecodedLines {
        reader,
        buf: Vec::new(),
    }
}

impl<R: BufRead> Iterator for DecodedLines<R> {
    type Item = Result<String, LoadError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.buf.clear();
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => None,
            Ok(_) => {
                if self.buf.last() == Some(&b'\n') {
                    self.buf.pop();
                    if self.buf.last() == Some(&b'\r') {
                        self.buf.pop();
                    }
                }
                Some(Ok(decode_line(&self.buf)))
            }
            Err(err) => Some(Err(LoadError::Filesystem(err.to_string()))),
        }
    }
}

pub fn decode_line(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            tracing::debug!("line is not UTF-8; reading it as Latin-1");
            bytes.iter().map(|&byte| char::from(byte)).collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use camino::Utf8PathBuf;
    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    fn lines(path: &Utf8Path) -> Vec<String> {
        decoded_lines(open_input(path).unwrap())
            .collect::<Result<Vec<_>, _>>()
            .unwrap()
    }

    #[test]
    fn reads_plain_and_gzip_alike() {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();

        let plain = root.join("mapping.txt");
        std::fs::write(plain.as_std_path(), "a|b\nc|d\n").unwrap();

        let gz = root.join("mapping.txt.gz");
        let mut encoder = GzEncoder::new(
            File::create(gz.as_std_path()).unwrap(),
            Compression::default(),
        );
        encoder.write_all(b"a|b\nc|d\n").unwrap();
        encoder.finish().unwrap();

        assert_eq!(lines(&plain), vec!["a|b", "c|d"]);
        assert_eq!(lines(&gz), lines(&plain));
    }

    #[test]
    fn latin1_bytes_do_not_break_the_stream() {
        let input: &[u8] = b"a|caf\xe9\r\nb|ok\nlast";
        let lines = decoded_lines(input)
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert_eq!(lines, vec!["a|caf\u{e9}", "b|ok", "last"]);
    }

    #[test]
    fn missing_file_is_filesystem_error() {
        let err = open_input(Utf8Path::new("/nonexistent/mapping.txt")).err().unwrap();
        assert!(matches!(err, LoadError::Filesystem(_)));
    }
}
