//! MCU object identifiers.

/// Handle of an MCU-side object.
pub type Oid = u32;

/// Hands out object ids in allocation order, starting at 0.
#[derive(Debug, Default)]
pub struct OidAllocator {
    next: Oid,
}

impl OidAllocator {
    /// Create an allocator with no ids handed out.
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Reserve the next id.
    pub fn reserve(&mut self) -> Oid {
        let oid = self.next;
        self.next += 1;
        oid
    }

    /// Number of ids handed out, as sent in `allocate_oids`.
    pub fn count(&self) -> u32 {
        self.next
    }
}
