use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
};

/// Owns a value and hands it to `func` when dropped.
///
/// ```ignore
/// let source = InvokeOnDrop::transform(host.open(name)?, |mut s| s.close());
/// read_header(&**source)?; // closed even if this fails
/// ```
#[must_use = "hold the guard in a local variable to delay the callback until scope exit"]
pub struct InvokeOnDrop<T, F: FnOnce(T)> {
    func: ManuallyDrop<F>,
    val: ManuallyDrop<T>,
}

impl<T, F: FnOnce(T)> InvokeOnDrop<T, F> {
    #[inline]
    pub fn transform(val: T, func: F) -> Self {
        InvokeOnDrop {
            func: ManuallyDrop::new(func),
            val: ManuallyDrop::new(val),
        }
    }
}

impl<T, F: FnOnce(T)> Drop for InvokeOnDrop<T, F> {
    fn drop(&mut self) {
        // SAFETY: drop runs at most once and nothing touches the fields afterwards.
        let func = unsafe { ManuallyDrop::take(&mut self.func) };
        let val = unsafe { ManuallyDrop::take(&mut self.val) };

        func(val);
    }
}

impl<T, F: FnOnce(T)> Deref for InvokeOnDrop<T, F> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.val
    }
}

impl<T, F: FnOnce(T)> DerefMut for InvokeOnDrop<T, F> {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.val
    }
}
