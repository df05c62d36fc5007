//! Planificación de chunks alineados a fronteras de línea.
//!
//! Se parte de los offsets ingenuos `k * size / N` y cada offset interior
//! se corre hacia adelante hasta el byte siguiente al próximo '\n'. El
//! último chunk siempre termina en EOF.

use std::{
    fs::File,
    io::{Read, Seek, SeekFrom},
    path::Path,
};

use crate::error::ChunkingError;
use crate::task::Chunk;

/// Tamaño de cada lectura al buscar el próximo salto de línea.
const SCAN_BLOCK: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkTarget {
    /// Cantidad de chunks deseada (puede salir menor si hay pocas líneas)
    Count(u32),
    /// Tamaño aproximado de cada chunk en bytes
    Size(u64),
}

/// Busca la primera frontera de registro `>= offset`.
///
/// Escanea desde `offset - 1` para que un offset que ya cae justo después
/// de un '\n' quede tal cual. Si no hay '\n' antes de EOF devuelve
/// `file_size`.
fn next_boundary<R: Read + Seek>(
    reader: &mut R,
    offset: u64,
    file_size: u64,
    max_record_bytes: u64,
) -> Result<u64, ChunkingError> {
    let mut pos = offset.saturating_sub(1);
    reader.seek(SeekFrom::Start(pos))?;

    let mut scanned: u64 = 0;
    let mut buf = vec![0u8; SCAN_BLOCK];

    while pos < file_size {
        if scanned >= max_record_bytes {
            return Err(ChunkingError::RecordTooLarge {
                offset,
                guard: max_record_bytes,
            });
        }

        let want = (SCAN_BLOCK as u64)
            .min(max_record_bytes - scanned)
            .min(file_size - pos) as usize;
        let n = reader.read(&mut buf[..want])?;
        if n == 0 {
            break;
        }

        if let Some(i) = buf[..n].iter().position(|b| *b == b'\n') {
            return Ok(pos + i as u64 + 1);
        }

        pos += n as u64;
        scanned += n as u64;
    }

    Ok(file_size)
}

/// Planea los chunks de un archivo de `file_size` bytes leído desde `reader`.
pub fn plan_chunks<R: Read + Seek>(
    reader: &mut R,
    file_id: &str,
    file_size: u64,
    target: ChunkTarget,
    max_record_bytes: u64,
) -> Result<Vec<Chunk>, ChunkingError> {
    if max_record_bytes == 0 {
        return Err(ChunkingError::InvalidTarget(
            "max_record_bytes debe ser > 0".to_string(),
        ));
    }

    let n: u64 = match target {
        ChunkTarget::Count(0) => {
            return Err(ChunkingError::InvalidTarget("chunk_count = 0".to_string()))
        }
        ChunkTarget::Size(0) => {
            return Err(ChunkingError::InvalidTarget("chunk_size = 0".to_string()))
        }
        ChunkTarget::Count(n) => n as u64,
        ChunkTarget::Size(s) => file_size.div_ceil(s),
    };

    if file_size == 0 {
        return Ok(Vec::new());
    }

    let n = n.clamp(1, file_size);

    let mut boundaries: Vec<u64> = vec![0];
    for k in 1..n {
        let naive = ((k as u128 * file_size as u128) / n as u128) as u64;
        let prev = *boundaries.last().unwrap_or(&0);
        if naive <= prev {
            continue;
        }

        let b = next_boundary(reader, naive, file_size, max_record_bytes)?;
        if b >= file_size {
            break;
        }
        if b > prev {
            boundaries.push(b);
        }
    }
    boundaries.push(file_size);

    let chunks = boundaries
        .windows(2)
        .enumerate()
        .map(|(i, w)| Chunk {
            file_id: file_id.to_string(),
            index: i as u32,
            start_offset: w[0],
            end_offset: w[1],
        })
        .collect();

    Ok(chunks)
}

/// Igual que `plan_chunks` pero abriendo el archivo en `path`.
pub fn plan_file(
    path: &Path,
    target: ChunkTarget,
    max_record_bytes: u64,
) -> Result<Vec<Chunk>, ChunkingError> {
    let mut file = File::open(path)?;
    let file_size = file.metadata()?.len();
    let file_id = path.to_string_lossy().to_string();
    plan_chunks(&mut file, &file_id, file_size, target, max_record_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{env, fs, io::Cursor, path::PathBuf};

    fn temp_dir(sub: &str) -> PathBuf {
        let base = env::temp_dir().join("chunker_tests").join(sub);
        let _ = fs::remove_dir_all(&base);
        fs::create_dir_all(&base).unwrap();
        base
    }

    /// Líneas de largo variable para que los offsets ingenuos caigan en
    /// cualquier parte de un registro.
    fn sample_log(lines: usize) -> Vec<u8> {
        let mut out = String::new();
        for i in 0..lines {
            let pad = "x".repeat((i * 7) % 23);
            out.push_str(&format!(
                "2024-03-01T12:00:{:02}Z INFO Request processed in {}ms {}\n",
                i % 60,
                i,
                pad
            ));
        }
        out.into_bytes()
    }

    fn assert_valid_plan(data: &[u8], chunks: &[Chunk]) {
        let size = data.len() as u64;
        assert!(!chunks.is_empty());
        assert_eq!(chunks[0].start_offset, 0);
        assert_eq!(chunks.last().unwrap().end_offset, size);

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.index as usize, i);
            assert!(c.start_offset < c.end_offset, "chunk vacío: {:?}", c);
            if c.start_offset > 0 {
                assert_eq!(data[c.start_offset as usize - 1], b'\n');
            }
        }
        for w in chunks.windows(2) {
            assert_eq!(w[0].end_offset, w[1].start_offset);
        }
    }

    #[test]
    fn chunks_cover_file_without_splitting_records() {
        let data = sample_log(200);
        for n in [1u32, 2, 3, 4, 7, 16, 64, 199, 200, 1000] {
            let mut cur = Cursor::new(data.clone());
            let chunks = plan_chunks(
                &mut cur,
                "app.log",
                data.len() as u64,
                ChunkTarget::Count(n),
                4096,
            )
            .unwrap();

            assert_valid_plan(&data, &chunks);
            assert!(chunks.len() <= n as usize);

            let lines: usize = chunks
                .iter()
                .map(|c| {
                    data[c.start_offset as usize..c.end_offset as usize]
                        .iter()
                        .filter(|b| **b == b'\n')
                        .count()
                })
                .sum();
            assert_eq!(lines, 200, "n={}", n);
        }
    }

    #[test]
    fn offset_right_after_newline_is_kept() {
        // 4 líneas de 10 bytes: 40/2 = 20 ya es frontera
        let data = b"aaaaaaaaa\nbbbbbbbbb\nccccccccc\nddddddddd\n".to_vec();
        let mut cur = Cursor::new(data.clone());
        let chunks = plan_chunks(&mut cur, "f", 40, ChunkTarget::Count(2), 100).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].end_offset, 20);
    }

    #[test]
    fn last_record_without_trailing_newline_ends_at_eof() {
        let data = b"INFO uno\nINFO dos\nINFO tres sin salto".to_vec();
        let mut cur = Cursor::new(data.clone());
        let chunks =
            plan_chunks(&mut cur, "f", data.len() as u64, ChunkTarget::Count(3), 100).unwrap();
        assert_valid_plan(&data, &chunks);
    }

    #[test]
    fn size_target_produces_roughly_sized_chunks() {
        let data = sample_log(100);
        let mut cur = Cursor::new(data.clone());
        let chunks =
            plan_chunks(&mut cur, "f", data.len() as u64, ChunkTarget::Size(1024), 4096).unwrap();
        assert_valid_plan(&data, &chunks);
        let expected = data.len().div_ceil(1024);
        assert!(chunks.len() <= expected);
        assert!(chunks.len() >= expected - 1);
    }

    #[test]
    fn record_larger_than_guard_fails() {
        let mut data = b"INFO corto\n".to_vec();
        data.extend(std::iter::repeat(b'x').take(500));
        data.extend_from_slice(b"\nINFO fin\n");
        let mut cur = Cursor::new(data.clone());

        let err = plan_chunks(&mut cur, "f", data.len() as u64, ChunkTarget::Count(2), 64)
            .unwrap_err();
        assert!(matches!(err, ChunkingError::RecordTooLarge { guard: 64, .. }));
    }

    #[test]
    fn empty_file_has_no_chunks() {
        let mut cur = Cursor::new(Vec::<u8>::new());
        let chunks = plan_chunks(&mut cur, "f", 0, ChunkTarget::Count(4), 100).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn zero_targets_are_rejected() {
        let mut cur = Cursor::new(b"a\n".to_vec());
        assert!(matches!(
            plan_chunks(&mut cur, "f", 2, ChunkTarget::Count(0), 100),
            Err(ChunkingError::InvalidTarget(_))
        ));
        assert!(matches!(
            plan_chunks(&mut cur, "f", 2, ChunkTarget::Size(0), 100),
            Err(ChunkingError::InvalidTarget(_))
        ));
    }

    #[test]
    fn plan_file_uses_path_as_file_id() {
        let tmp = temp_dir("plan_file");
        let path = tmp.join("app.log");
        fs::write(&path, sample_log(50)).unwrap();

        let chunks = plan_file(&path, ChunkTarget::Count(4), 4096).unwrap();
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.file_id == path.to_string_lossy()));
    }

    #[test]
    fn plan_file_missing_is_io_error() {
        let tmp = temp_dir("missing");
        let err = plan_file(&tmp.join("nope.log"), ChunkTarget::Count(2), 100).unwrap_err();
        assert!(matches!(err, ChunkingError::Io(_)));
    }
}
