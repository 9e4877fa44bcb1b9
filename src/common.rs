pub type Sequence = u32;
pub type Unit = u32;
pub type Digest = [u8; 16];

/// "OWRT": marks the start of every record, and the device reset marker.
pub const MAGIC: u32 = 0x4f57_5254;
pub const KIND_DATA: u32 = 0x4441_5441; // "DATA"
pub const KIND_CONF: u32 = 0x434f_4e46; // "CONF"

/// Upper bound on a record payload. Anything larger is a corrupt header.
pub const MAX_PAYLOAD_LEN: u32 = 8 * 1024 * 1024;

/// Value an erased flash byte reads back as.
pub const ERASED_BYTE: u8 = 0xff;

/// Chunk size used when streaming payloads to and from the device.
pub const COPY_CHUNK: usize = 256;
