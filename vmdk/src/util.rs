use positioned_io2::ReadAt;

const CHUNK_SIZE: usize = 64 * 1024;

pub trait ReadAtExt {
    /// Fills `buf` starting at `pos` until it is full or the source runs out,
    /// returning the number of bytes read.
    fn read_full_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize>;
    fn read_to_end_at(&self, pos: u64) -> std::io::Result<Vec<u8>>;
}

impl<R: ReadAt + ?Sized> ReadAtExt for R {
    fn read_full_at(&self, pos: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let mut total = 0;
        while total < buf.len() {
            match self.read_at(pos + total as u64, &mut buf[total..]) {
                Ok(0) => break, // EOF
                Ok(n) => total += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(total)
    }

    fn read_to_end_at(&self, pos: u64) -> std::io::Result<Vec<u8>> {
        let mut out = Vec::new();
        let mut chunk = vec![0u8; CHUNK_SIZE];
        loop {
            let n = self.read_full_at(pos + out.len() as u64, &mut chunk)?;
            out.extend_from_slice(&chunk[..n]);
            if n < CHUNK_SIZE {
                return Ok(out);
            }
        }
    }
}
