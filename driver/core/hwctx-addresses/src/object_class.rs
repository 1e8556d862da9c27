use core::fmt;

/// The kinds of hardware object contexts managed by the driver core.
///
/// Each class has its own identifier space, its own address table and its own
/// set of context opcodes.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum ObjectClass {
    CompletionQueue,
    QueuePair,
    SharedReceiveQueue,
    MemoryRegion,
}

impl ObjectClass {
    /// Every class, in table index order.
    pub const ALL: [Self; 4] = [
        Self::CompletionQueue,
        Self::QueuePair,
        Self::SharedReceiveQueue,
        Self::MemoryRegion,
    ];

    pub const COUNT: usize = Self::ALL.len();

    /// Dense index, usable for per-class arrays.
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::CompletionQueue => 0,
            Self::QueuePair => 1,
            Self::SharedReceiveQueue => 2,
            Self::MemoryRegion => 3,
        }
    }

    #[inline]
    #[must_use]
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::CompletionQueue => "cq",
            Self::QueuePair => "qp",
            Self::SharedReceiveQueue => "srq",
            Self::MemoryRegion => "mr",
        }
    }
}

impl fmt::Display for ObjectClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}
