/// A 4-digit decimal wire status code (spec.md section 6).
///
/// `0000` is success; everything else is an error. The low 4 digits are
/// significant on the wire; constructing from a larger number truncates
/// (matching the original server's "pad/truncate to 4 bytes" behavior for
/// over-long status values).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Status = Status(0);
    pub const GENERIC_ERROR: Status = Status(1);
    pub const NO_SUCH_WORKSPACE: Status = Status(100);
    pub const INTERNAL_ERROR: Status = Status(2000);
    pub const NOT_OPENED_BY_CLIENT: Status = Status(2001);

    pub fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Renders the 4-byte ASCII-decimal wire representation, truncating
    /// (with a caller-side log warning, per spec.md section 4.B) if the
    /// value does not fit.
    pub fn to_wire(self) -> [u8; 4] {
        let rendered = format!("{:04}", self.0);
        let bytes = rendered.as_bytes();
        let mut out = [b'0'; 4];
        if bytes.len() <= 4 {
            out[4 - bytes.len()..].copy_from_slice(bytes);
        } else {
            log::warn!("status {} does not fit in 4 bytes, truncating", self.0);
            out.copy_from_slice(&bytes[bytes.len() - 4..]);
        }
        out
    }

    pub fn from_wire(bytes: [u8; 4]) -> Option<Status> {
        std::str::from_utf8(&bytes)
            .ok()
            .and_then(|s| s.parse::<u16>().ok())
            .map(Status)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:04}", self.0)
    }
}
