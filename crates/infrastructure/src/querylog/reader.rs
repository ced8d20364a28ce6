use super::scanner;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Chunk size for backward scans. Lines average a few hundred bytes, so
/// one chunk covers dozens of entries.
const CHUNK: u64 = 16 * 1024;

/// Read-only view over one log file generation.
///
/// All methods are synchronous; the store runs them on a blocking task so
/// DNS workers never wait on file I/O.
pub struct LogFileReader {
    file: File,
    len: u64,
}

impl LogFileReader {
    /// `Ok(None)` when the file does not exist.
    pub fn open(path: &Path) -> std::io::Result<Option<Self>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };
        let len = file.metadata()?.len();
        Ok(Some(Self { file, len }))
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// First line of the file, used by rotation to age the file.
    pub fn first_line(&mut self) -> std::io::Result<Option<String>> {
        if self.len == 0 {
            return Ok(None);
        }
        self.file.seek(SeekFrom::Start(0))?;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(pos) = chunk[..n].iter().position(|&b| b == b'\n') {
                buf.extend_from_slice(&chunk[..pos]);
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
        }
        if buf.is_empty() {
            return Ok(None);
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Walk complete lines backward starting just before `end`, newest
    /// first. `visit` returns `false` to stop early.
    pub fn for_each_line_backward<F>(&mut self, end: u64, mut visit: F) -> std::io::Result<()>
    where
        F: FnMut(u64, &str) -> bool,
    {
        let mut pos = end.min(self.len);
        // Bytes of a line whose beginning lives in an earlier chunk.
        let mut carry: Vec<u8> = Vec::new();

        while pos > 0 {
            let chunk_size = CHUNK.min(pos);
            let chunk_start = pos - chunk_size;
            let mut data = vec![0u8; chunk_size as usize];
            self.file.seek(SeekFrom::Start(chunk_start))?;
            self.file.read_exact(&mut data)?;
            data.extend_from_slice(&carry);

            let mut line_end = data.len();
            for i in (0..chunk_size as usize).rev() {
                if data[i] == b'\n' {
                    let line = &data[i + 1..line_end];
                    if !line.is_empty() {
                        let text = String::from_utf8_lossy(line);
                        if !visit(chunk_start + i as u64 + 1, &text) {
                            return Ok(());
                        }
                    }
                    line_end = i;
                }
            }

            carry = data[..line_end].to_vec();
            pos = chunk_start;
        }

        if !carry.is_empty() {
            let text = String::from_utf8_lossy(&carry);
            visit(0, &text);
        }
        Ok(())
    }

    /// The complete line containing byte `offset`: `(line_start, text)`.
    pub fn line_at(&mut self, offset: u64) -> std::io::Result<Option<(u64, String)>> {
        if self.len == 0 {
            return Ok(None);
        }
        let offset = offset.min(self.len - 1);

        // Scan backward for the newline just before `offset`.
        let mut line_start = 0u64;
        let mut search_end = offset + 1;
        'outer: while search_end > 0 {
            let chunk_size = CHUNK.min(search_end);
            let chunk_start = search_end - chunk_size;
            let mut data = vec![0u8; chunk_size as usize];
            self.file.seek(SeekFrom::Start(chunk_start))?;
            self.file.read_exact(&mut data)?;
            for i in (0..data.len()).rev() {
                // The newline at `offset` itself terminates the previous
                // line only if offset is past it.
                let absolute = chunk_start + i as u64;
                if data[i] == b'\n' && absolute < offset {
                    line_start = absolute + 1;
                    break 'outer;
                }
            }
            search_end = chunk_start;
        }

        // Read forward to the line's end.
        let mut line = Vec::new();
        self.file.seek(SeekFrom::Start(line_start))?;
        let mut chunk = [0u8; 4096];
        loop {
            let n = self.file.read(&mut chunk)?;
            if n == 0 {
                break;
            }
            if let Some(idx) = chunk[..n].iter().position(|&b| b == b'\n') {
                line.extend_from_slice(&chunk[..idx]);
                break;
            }
            line.extend_from_slice(&chunk[..n]);
        }
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some((line_start, String::from_utf8_lossy(&line).into_owned())))
    }

    /// Byte offset of the first line whose timestamp is `>= target_ns`,
    /// assuming timestamps are non-decreasing through the file. Returns
    /// `len` when every line is older.
    ///
    /// Probes read one line each; the expected probe count is
    /// log2(len / avg_line) plus a small constant.
    pub fn seek_to_time(&mut self, target_ns: i64) -> std::io::Result<u64> {
        let mut lo = 0u64;
        let mut hi = self.len;

        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let Some((line_start, line)) = self.line_at(mid)? else {
                break;
            };
            match scanner::line_timestamp_ns(&line) {
                Some(ts) if ts >= target_ns => {
                    if line_start >= hi {
                        break;
                    }
                    hi = line_start;
                }
                Some(_) => {
                    let line_end = line_start + line.len() as u64 + 1;
                    if line_end <= lo {
                        break;
                    }
                    lo = line_end;
                }
                // Corrupt line: narrow from the top so the scan still
                // terminates.
                None => {
                    if line_start >= hi {
                        break;
                    }
                    hi = line_start;
                }
            }
        }
        Ok(hi.min(self.len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_log(lines: &[String]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    fn entry_line(ts: &str, host: &str) -> String {
        format!(
            r#"{{"IP":"10.0.0.1","T":"{}","QH":"{}","QT":"A","QC":"IN","CP":"","Result":{{"IsFiltered":false,"Reason":0}},"Elapsed":1000}}"#,
            ts, host
        )
    }

    #[test]
    fn test_backward_iteration_order() {
        let lines = vec![
            entry_line("2024-05-01T10:00:00.000000001Z", "a.test"),
            entry_line("2024-05-01T10:00:00.000000002Z", "b.test"),
            entry_line("2024-05-01T10:00:00.000000003Z", "c.test"),
        ];
        let file = write_log(&lines);
        let mut reader = LogFileReader::open(file.path()).unwrap().unwrap();

        let mut seen = Vec::new();
        reader
            .for_each_line_backward(reader.len(), |_, line| {
                seen.push(scanner::string_field(line, "QH").unwrap().to_string());
                true
            })
            .unwrap();
        assert_eq!(seen, ["c.test", "b.test", "a.test"]);
    }

    #[test]
    fn test_backward_iteration_early_stop() {
        let lines: Vec<String> = (0..10)
            .map(|i| entry_line("2024-05-01T10:00:00Z", &format!("h{}.test", i)))
            .collect();
        let file = write_log(&lines);
        let mut reader = LogFileReader::open(file.path()).unwrap().unwrap();

        let mut count = 0;
        reader
            .for_each_line_backward(reader.len(), |_, _| {
                count += 1;
                count < 3
            })
            .unwrap();
        assert_eq!(count, 3);
    }

    #[test]
    fn test_line_at_finds_spanning_line() {
        let lines = vec![
            entry_line("2024-05-01T10:00:00Z", "first.test"),
            entry_line("2024-05-01T10:00:01Z", "second.test"),
        ];
        let file = write_log(&lines);
        let mut reader = LogFileReader::open(file.path()).unwrap().unwrap();

        let first_len = lines[0].len() as u64;
        // An offset in the middle of the second line resolves to its start.
        let (start, text) = reader.line_at(first_len + 10).unwrap().unwrap();
        assert_eq!(start, first_len + 1);
        assert!(text.contains("second.test"));

        let (start, text) = reader.line_at(3).unwrap().unwrap();
        assert_eq!(start, 0);
        assert!(text.contains("first.test"));
    }

    #[test]
    fn test_seek_to_time() {
        let base = chrono::DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .timestamp_nanos_opt()
            .unwrap();
        let lines: Vec<String> = (0..100)
            .map(|i| {
                let ts = chrono::DateTime::from_timestamp_nanos(base + i * 1_000_000_000)
                    .to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
                entry_line(&ts, &format!("h{}.test", i))
            })
            .collect();
        let file = write_log(&lines);
        let mut reader = LogFileReader::open(file.path()).unwrap().unwrap();

        // Exact hit on entry 50.
        let offset = reader.seek_to_time(base + 50 * 1_000_000_000).unwrap();
        let (_, line) = reader.line_at(offset).unwrap().unwrap();
        assert_eq!(scanner::string_field(&line, "QH"), Some("h50.test"));

        // Between entries: first entry at or after the target.
        let offset = reader.seek_to_time(base + 50 * 1_000_000_000 + 1).unwrap();
        let (_, line) = reader.line_at(offset).unwrap().unwrap();
        assert_eq!(scanner::string_field(&line, "QH"), Some("h51.test"));

        // Before the first entry.
        let offset = reader.seek_to_time(base - 1).unwrap();
        assert_eq!(offset, 0);

        // After the last entry.
        let offset = reader.seek_to_time(base + 1_000 * 1_000_000_000).unwrap();
        assert_eq!(offset, reader.len());
    }

    #[test]
    fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(LogFileReader::open(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }
}
