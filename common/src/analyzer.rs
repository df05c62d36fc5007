use std::{
    collections::BTreeMap,
    fs::File,
    io::{self, BufRead, BufReader, Read, Seek, SeekFrom},
    path::Path,
};

use crate::record::{parse_line, ParsedLine};
use crate::results::{PartialResult, SecondSample, TimeRange};
use crate::task::TaskAssignment;

/// Conteos locales de un chunk, antes de convertirse en `PartialResult`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkStats {
    pub bytes_read: u64,
    pub line_count: u64,
    pub error_count: u64,
    pub request_count: u64,
    pub response_time_sum: f64,
    pub response_time_count: u64,
    pub parse_error_count: u64,
    pub time_range: Option<TimeRange>,
    /// epoch second -> conteos de ese segundo
    pub samples: BTreeMap<i64, SecondSample>,
}

impl ChunkStats {
    /// Acumula una línea ya parseada.
    ///
    /// Las líneas malformadas siempre suman a `parse_error_count`; sólo
    /// aportan a errores/requests/tiempos si tienen un nivel reconocible.
    /// Toda línea con timestamp suma a la muestra de su segundo.
    pub fn observe(&mut self, parsed: &ParsedLine) {
        self.line_count += 1;

        if matches!(parsed, ParsedLine::Malformed(_)) {
            self.parse_error_count += 1;
        }

        let level = parsed.level();
        let is_error = level.is_some_and(|l| l.is_error());
        let is_request = level.is_some() && parsed.is_request();
        let response_time = level.and(parsed.response_time_ms());

        if is_error {
            self.error_count += 1;
        }
        if is_request {
            self.request_count += 1;
        }
        if let Some(rt) = response_time {
            self.response_time_sum += rt;
            self.response_time_count += 1;
        }

        if let Some(ts) = parsed.timestamp() {
            match self.time_range.as_mut() {
                Some(range) => range.extend(ts),
                None => self.time_range = Some(TimeRange::at(ts)),
            }

            let second = ts.timestamp();
            let sample = self.samples.entry(second).or_insert_with(|| SecondSample {
                second,
                ..Default::default()
            });
            sample.line_count += 1;
            if is_error {
                sample.error_count += 1;
            }
            if is_request {
                sample.request_count += 1;
            }
            if let Some(rt) = response_time {
                sample.response_time_sum += rt;
                sample.response_time_count += 1;
            }
        }
    }

    pub fn into_partial_result(self, assignment: &TaskAssignment, worker_id: &str) -> PartialResult {
        PartialResult {
            job_id: assignment.job_id.clone(),
            task_id: assignment.task_id.clone(),
            generation: assignment.generation,
            worker_id: worker_id.to_string(),
            line_count: self.line_count,
            error_count: self.error_count,
            request_count: self.request_count,
            response_time_sum: self.response_time_sum,
            response_time_count: self.response_time_count,
            parse_error_count: self.parse_error_count,
            time_range: self.time_range,
            samples: self.samples.into_values().collect(),
        }
    }
}

/// Lee líneas de `reader` hasta EOF y acumula sus conteos.
/// Bytes no UTF-8 se decodifican con reemplazo.
pub fn analyze_reader<R: BufRead>(mut reader: R) -> io::Result<ChunkStats> {
    let mut stats = ChunkStats::default();
    let mut buf: Vec<u8> = Vec::with_capacity(4096);

    loop {
        buf.clear();
        let n = reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            break;
        }
        stats.bytes_read += n as u64;

        let line = String::from_utf8_lossy(&buf);
        if let Some(parsed) = parse_line(&line) {
            stats.observe(&parsed);
        }
    }

    Ok(stats)
}

/// Procesa exactamente los bytes `[start_offset, end_offset)` del chunk.
pub fn analyze_chunk(assignment: &TaskAssignment) -> io::Result<ChunkStats> {
    let chunk = &assignment.chunk;
    let mut file = File::open(Path::new(&chunk.file_id))?;
    file.seek(SeekFrom::Start(chunk.start_offset))?;

    let reader = BufReader::new(file.take(chunk.len()));
    let stats = analyze_reader(reader)?;

    if stats.bytes_read != chunk.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "chunk {} de {}: se esperaban {} bytes y se leyeron {}",
                chunk.index,
                chunk.file_id,
                chunk.len(),
                stats.bytes_read
            ),
        ));
    }

    Ok(stats)
}
