/// Out-of-band view of the device's reset machinery.
///
/// Owned by whoever drives function-level resets (typically the NIC driver
/// the RDMA function hangs off). Polled by the reset monitor; never blocks.
pub trait ResetSignal {
    /// Count of hardware resets completed since the device came up.
    /// Monotonic; a change means every in-flight command was dropped.
    fn reset_generation(&self) -> u64;

    /// A hardware reset is currently underway.
    fn is_hardware_resetting(&self) -> bool;

    /// The owning driver is tearing down or re-initialising in software.
    fn is_software_resetting(&self) -> bool {
        false
    }
}
