use std::fs::File;
use std::io;
use std::path::Path;

use md5::{Digest as _, Md5};

use crate::common::Digest;

/// 128-bit content digest of a whole file.
pub fn file_digest<P: AsRef<Path>>(path: P) -> io::Result<Digest> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(to_digest(&hasher.finalize()))
}

pub fn bytes_digest(data: &[u8]) -> Digest {
    to_digest(&Md5::digest(data))
}

fn to_digest(raw: &[u8]) -> Digest {
    let mut out = [0u8; 16];
    out.copy_from_slice(raw);
    out
}
