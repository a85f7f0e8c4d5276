//! State shared between interrupt handlers and the main loop.
//!
//! Every access goes through one `critical_section::with`, so multi-word
//! values are never observed half-written.

use core::cell::RefCell;

use critical_section::Mutex;

pub struct Shared<T> {
    inner: Mutex<RefCell<T>>,
}

impl<T> Shared<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(RefCell::new(value)),
        }
    }

    /// Run `f` with exclusive access. `f` must not re-enter the same `Shared`.
    #[inline]
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        critical_section::with(|cs| f(&mut self.inner.borrow_ref_mut(cs)))
    }
}

impl<T: Copy> Shared<T> {
    #[inline]
    pub fn get(&self) -> T {
        critical_section::with(|cs| *self.inner.borrow_ref(cs))
    }

    #[inline]
    pub fn set(&self, value: T) {
        critical_section::with(|cs| *self.inner.borrow_ref_mut(cs) = value);
    }
}

impl<T: Default> Default for Shared<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("Shared").field(&self.get()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::Shared;
    use std::sync::Arc;

    #[test]
    fn updates_are_visible_across_threads() {
        let s = Arc::new(Shared::new((0u32, 0u32)));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        s.with(|(a, b)| {
                            *a += 1;
                            *b += 1;
                        });
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let (a, b) = s.get();
        assert_eq!(a, 4000);
        assert_eq!(a, b);
    }
}
