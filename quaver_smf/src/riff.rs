//! There's an abomination called RMID: MIDI embedded in a RIFF container.
//! Support for these files is provided by unwrapping the input slice,
//! stripping away the RIFF framing around the raw SMF payload.

use crate::prelude::*;

struct ChunkIter<'a>(&'a [u8]);
impl<'a> Iterator for ChunkIter<'a> {
    type Item = ([u8; 4], &'a [u8]);
    fn next(&mut self) -> Option<([u8; 4], &'a [u8])> {
        let head = read_slice(&mut self.0, 8).ok()?;
        let mut id = [0; 4];
        id.copy_from_slice(&head[..4]);
        let len = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
        let data = match read_slice(&mut self.0, len as usize) {
            Ok(data) => data,
            Err(_) => std::mem::take(&mut self.0),
        };
        // Chunks are padded to even lengths
        if len % 2 == 1 {
            let _pad = read_slice(&mut self.0, 1);
        }
        Some((id, data))
    }
}

/// Strip the RIFF framing off an RMID file, returning the embedded SMF bytes.
pub(crate) fn unwrap(raw: &[u8]) -> Result<&[u8]> {
    let (id, mut riff) = ChunkIter(raw)
        .next()
        .ok_or_else(|| Error::from(err_invalid!("no main riff chunk")))?;
    ensure!(&id == b"RIFF", err_invalid!("invalid main riff chunk"));
    let formtype = read_slice(&mut riff, 4).context(err_invalid!("failed to read riff formtype"))?;
    ensure!(formtype == b"RMID", err_invalid!("riff formtype is not rmid"));
    for (id, chunk) in ChunkIter(riff) {
        if &id == b"data" {
            return Ok(chunk);
        }
    }
    bail!(err_invalid!("no rmid data chunk"))
}
