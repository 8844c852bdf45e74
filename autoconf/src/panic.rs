#[macro_export]
/// Abort on a violated framework invariant.
///
/// Double unmaps, double disestablishes, frees of ranges that were never allocated and
/// out-of-order attaches would corrupt the address-space bookkeeping or the device tree,
/// so they never return an error.
macro_rules! panic_dev {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        panic!(
            concat!("Device framework invariant violated:\n\t", $fmt)
             $(, $($arg)+)?)
    }
}
