/// MMIO access to one device function.
///
/// Offsets are byte offsets into the function's register window. Register
/// layouts are device specific; the command channel takes its offsets from
/// configuration.
pub trait RegisterAccess {
    fn write_reg(&self, offset: u32, value: u32);

    fn read_reg(&self, offset: u32) -> u32;

    /// Data-path doorbell write.
    fn ring_doorbell(&self, value: u64);
}
