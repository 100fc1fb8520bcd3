use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::MultiGzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{AnnotError, Result};

fn is_gz(path: &Path) -> bool {
    path.extension().map(|ext| ext == "gz").unwrap_or(false)
}

/// Open a file for reading; if it ends with ".gz", wrap it in a MultiGzDecoder
pub fn open_input(path: &Path) -> Result<Box<dyn BufRead>> {
    let f = File::open(path).map_err(|e| AnnotError::io(path, e))?;
    let reader: Box<dyn BufRead> = if is_gz(path) {
        Box::new(BufReader::new(MultiGzDecoder::new(f)))
    } else {
        Box::new(BufReader::new(f))
    };
    Ok(reader)
}

/// A writer that compresses when its path ends with ".gz".
/// Call `finish` so the gzip trailer is written and errors are seen.
pub enum OutputFile {
    Plain(BufWriter<File>),
    Gz(GzEncoder<BufWriter<File>>),
}

impl OutputFile {
    pub fn create(path: &Path) -> Result<Self> {
        let f = File::create(path).map_err(|e| AnnotError::io(path, e))?;
        let buffered = BufWriter::new(f);
        Ok(if is_gz(path) {
            OutputFile::Gz(GzEncoder::new(buffered, Compression::default()))
        } else {
            OutputFile::Plain(buffered)
        })
    }

    pub fn finish(self) -> io::Result<()> {
        match self {
            OutputFile::Plain(mut w) => w.flush(),
            OutputFile::Gz(enc) => enc.finish()?.flush(),
        }
    }
}

impl Write for OutputFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            OutputFile::Plain(w) => w.write(buf),
            OutputFile::Gz(w) => w.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            OutputFile::Plain(w) => w.flush(),
            OutputFile::Gz(w) => w.flush(),
        }
    }
}

/// One FASTA record exactly as it appeared in the file.
#[derive(Debug, Clone, PartialEq)]
pub struct FastaRecord {
    /// Header line without its line terminator, `>` included.
    pub header_line: String,
    /// Sequence lines without their line terminators.
    pub lines: Vec<String>,
    /// 1-based position of the record in its file.
    pub record_num: u64,
}

impl FastaRecord {
    /// Header text after the leading marker.
    pub fn header_text(&self) -> &str {
        self.header_line.strip_prefix('>').unwrap_or(&self.header_line)
    }

    /// Write header and sequence lines back out unchanged.
    pub fn write_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        writeln!(out, "{}", self.header_line)?;
        for line in &self.lines {
            writeln!(out, "{}", line)?;
        }
        Ok(())
    }
}

/// Streams FASTA records one at a time, keeping the raw lines.
pub struct FastaReader {
    reader: Box<dyn BufRead>,
    path: PathBuf,
    line: String,
    pending_header: Option<String>,
    records_read: u64,
    started: bool,
}

impl FastaReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        Ok(Self::from_reader(open_input(path)?, path))
    }

    /// `path` is only used to name the source in errors.
    pub fn from_reader(reader: Box<dyn BufRead>, path: impl AsRef<Path>) -> Self {
        Self {
            reader,
            path: path.as_ref().to_path_buf(),
            line: String::new(),
            pending_header: None,
            records_read: 0,
            started: false,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_line(&mut self) -> Result<Option<String>> {
        self.line.clear();
        let n = self
            .reader
            .read_line(&mut self.line)
            .map_err(|e| AnnotError::io(&self.path, e))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(self.line.trim_end_matches(['\n', '\r']).to_string()))
    }

    pub fn next_record(&mut self) -> Result<Option<FastaRecord>> {
        // 1) find the header: the first non-blank line of the file must carry the marker
        let header_line = match self.pending_header.take() {
            Some(h) => h,
            None => loop {
                match self.read_line()? {
                    None => return Ok(None),
                    Some(l) if !self.started && l.trim().is_empty() => continue,
                    Some(l) => {
                        if !l.starts_with('>') {
                            return Err(AnnotError::format(
                                &self.path,
                                self.records_read + 1,
                                format!("expected a FASTA header starting with '>', found `{l}`"),
                            ));
                        }
                        break l;
                    }
                }
            },
        };
        self.started = true;
        self.records_read += 1;

        // 2) sequence lines up to the next header or EOF
        let mut lines = Vec::new();
        while let Some(l) = self.read_line()? {
            if l.starts_with('>') {
                self.pending_header = Some(l);
                break;
            }
            lines.push(l);
        }

        Ok(Some(FastaRecord {
            header_line,
            lines,
            record_num: self.records_read,
        }))
    }
}

impl Iterator for FastaReader {
    type Item = Result<FastaRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}
