use core::{
    cell::UnsafeCell,
    ptr::{read_volatile, write_volatile},
};

/// A memory-mapped register accessed with exactly one volatile load or store of `T`.
#[repr(transparent)]
pub struct Register<T: Sized + Copy> {
    inner: UnsafeCell<T>,
}

impl<T: Sized + Copy> Register<T> {
    /// View the register living at `addr`.
    ///
    /// # Safety
    /// `addr` must be mapped, suitably aligned for `T` and valid for the lifetime `'a`.
    #[inline(always)]
    pub unsafe fn at<'a>(addr: usize) -> &'a Register<T> {
        unsafe { &*(addr as *const Register<T>) }
    }

    #[inline(always)]
    pub fn read(&self) -> T {
        unsafe { read_volatile(self.inner.get()) }
    }

    #[inline(always)]
    pub fn write(&self, value: T) {
        unsafe {
            write_volatile(self.inner.get(), value);
        }
    }
}
