//! Pooled page buffers, shared between the vertices of a worker.
//!
//! A [`pool::BufferPool`] hands out writable [`pool::PageMut`] pages of a fixed size. A page is
//! filled, frozen into an immutable [`pool::Bytes`], and may then be sliced and shared between
//! threads. Once the last `Bytes` referencing a page is dropped, the allocation is returned to
//! the pool it came from (if the pool still exists and has room for it).
//!
//! The pool mediates access with its own lock, held only for the duration of a checkout or a
//! return; callers never lock pages themselves.
//!
//! # Examples
//!
//! ```
//! use std::io::Write;
//! use braid_bytes::pool::BufferPool;
//!
//! let pool = BufferPool::new(1024, 4);
//! let mut page = pool.checkout();
//! page.write_all(&[1u8; 100]).unwrap();
//! page.write_all(&[2u8; 50]).unwrap();
//!
//! let mut bytes = page.freeze();
//! let front = bytes.extract_to(100);
//!
//! assert_eq!(front.len(), 100);
//! assert_eq!(bytes.len(), 50);
//! assert!(front.iter().all(|b| *b == 1));
//! assert!(bytes.iter().all(|b| *b == 2));
//!
//! drop(front);
//! drop(bytes);
//! assert_eq!(pool.stashed(), 1);
//! ```
#![forbid(missing_docs)]

/// Page checkout and return, and the shared byte slices built over pages.
pub mod pool {

    use std::ops::{Deref, DerefMut, Range};
    use std::sync::{Arc, Mutex, Weak};

    struct PoolInner {
        page_size: usize,
        limit: usize,
        stash: Mutex<Vec<Vec<u8>>>,
    }

    impl PoolInner {
        /// Accepts a page allocation back, if it is a full-sized page and there is room.
        fn recycle(&self, mut buffer: Vec<u8>) {
            if buffer.capacity() >= self.page_size {
                if let Ok(mut stash) = self.stash.lock() {
                    if stash.len() < self.limit {
                        buffer.clear();
                        stash.push(buffer);
                    }
                }
            }
        }
    }

    /// A shared source of fixed-size pages.
    ///
    /// Cloning a pool produces another handle to the same stash.
    #[derive(Clone)]
    pub struct BufferPool {
        inner: Arc<PoolInner>,
    }

    impl BufferPool {
        /// Creates a pool of `page_size` byte pages that stashes at most `limit` idle pages.
        pub fn new(page_size: usize, limit: usize) -> Self {
            BufferPool {
                inner: Arc::new(PoolInner {
                    page_size,
                    limit,
                    stash: Mutex::new(Vec::new()),
                }),
            }
        }

        /// The nominal size of pages handed out by the pool.
        pub fn page_size(&self) -> usize { self.inner.page_size }

        /// The number of idle pages currently held by the pool.
        pub fn stashed(&self) -> usize {
            self.inner.stash.lock().map(|stash| stash.len()).unwrap_or(0)
        }

        /// Checks out an empty page of `page_size` capacity.
        pub fn checkout(&self) -> PageMut {
            let buffer =
            self.inner.stash
                .lock()
                .ok()
                .and_then(|mut stash| stash.pop())
                .unwrap_or_else(|| Vec::with_capacity(self.inner.page_size));

            PageMut {
                buffer,
                pool: Some(Arc::downgrade(&self.inner)),
            }
        }

        /// Checks out an empty page able to hold at least `bytes` bytes.
        ///
        /// Requests that exceed the page size receive a dedicated allocation, which is not
        /// returned to the pool once released.
        pub fn checkout_at_least(&self, bytes: usize) -> PageMut {
            if bytes <= self.inner.page_size {
                self.checkout()
            }
            else {
                PageMut {
                    buffer: Vec::with_capacity(bytes),
                    pool: None,
                }
            }
        }
    }

    /// A writable page, checked out of a pool.
    ///
    /// The page dereferences to the bytes written so far; `std::io::Write` appends.
    pub struct PageMut {
        buffer: Vec<u8>,
        pool: Option<Weak<PoolInner>>,
    }

    impl PageMut {
        /// Bytes written so far.
        pub fn len(&self) -> usize { self.buffer.len() }
        /// True if nothing has been written.
        pub fn is_empty(&self) -> bool { self.buffer.is_empty() }
        /// Bytes that may still be written before the page is full.
        pub fn remaining(&self) -> usize { self.buffer.capacity() - self.buffer.len() }
        /// Appends `bytes` to the page.
        pub fn extend_from_slice(&mut self, bytes: &[u8]) { self.buffer.extend_from_slice(bytes); }

        /// Converts the page into an immutable, shareable byte slice.
        pub fn freeze(mut self) -> Bytes {
            let buffer = std::mem::take(&mut self.buffer);
            let pool = self.pool.take();
            let len = buffer.len();
            Bytes {
                page: Arc::new(Page { buffer, pool }),
                range: 0 .. len,
            }
        }
    }

    impl Drop for PageMut {
        fn drop(&mut self) {
            if let Some(pool) = self.pool.take().and_then(|pool| pool.upgrade()) {
                pool.recycle(std::mem::take(&mut self.buffer));
            }
        }
    }

    impl Deref for PageMut {
        type Target = [u8];
        fn deref(&self) -> &[u8] { &self.buffer[..] }
    }

    impl DerefMut for PageMut {
        fn deref_mut(&mut self) -> &mut [u8] { &mut self.buffer[..] }
    }

    impl std::io::Write for PageMut {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.buffer.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
    }

    /// A frozen page, returned to its pool when the last reference drops.
    struct Page {
        buffer: Vec<u8>,
        pool: Option<Weak<PoolInner>>,
    }

    impl Drop for Page {
        fn drop(&mut self) {
            if let Some(pool) = self.pool.take().and_then(|pool| pool.upgrade()) {
                pool.recycle(std::mem::take(&mut self.buffer));
            }
        }
    }

    /// An immutable, thread-safe slice of a frozen page.
    #[derive(Clone)]
    pub struct Bytes {
        page: Arc<Page>,
        range: Range<usize>,
    }

    impl Bytes {
        /// Wraps an allocation that did not come from a pool.
        pub fn from_vec(buffer: Vec<u8>) -> Self {
            let len = buffer.len();
            Bytes {
                page: Arc::new(Page { buffer, pool: None }),
                range: 0 .. len,
            }
        }

        /// Extracts `[0, index)` into a new `Bytes` which is returned, updating `self`.
        ///
        /// Panics if `index` exceeds `self.len()`.
        pub fn extract_to(&mut self, index: usize) -> Bytes {

            assert!(index <= self.len());

            let result = Bytes {
                page: Arc::clone(&self.page),
                range: self.range.start .. self.range.start + index,
            };

            self.range.start += index;
            result
        }

        /// A sub-slice of these bytes, sharing the same page.
        ///
        /// Returns `None` if `range` exceeds the bytes available.
        pub fn slice(&self, range: Range<usize>) -> Option<Bytes> {
            if range.start <= range.end && range.end <= self.len() {
                Some(Bytes {
                    page: Arc::clone(&self.page),
                    range: self.range.start + range.start .. self.range.start + range.end,
                })
            }
            else {
                None
            }
        }

        /// True if `self` and `other` share the same underlying page.
        pub fn same_page(&self, other: &Bytes) -> bool {
            Arc::ptr_eq(&self.page, &other.page)
        }
    }

    impl Deref for Bytes {
        type Target = [u8];
        fn deref(&self) -> &[u8] {
            &self.page.buffer[self.range.clone()]
        }
    }

    impl std::fmt::Debug for Bytes {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.debug_struct("Bytes").field("len", &self.len()).finish()
        }
    }
}

#[cfg(test)]
mod tests {

    use std::io::Write;
    use super::pool::{BufferPool, Bytes};

    #[test]
    fn pages_return_on_last_drop() {
        let pool = BufferPool::new(64, 2);
        let mut page = pool.checkout();
        page.write_all(b"hello world").unwrap();
        let bytes = page.freeze();
        let copy = bytes.clone();
        let hello = bytes.slice(0 .. 5).unwrap();
        drop(bytes);
        drop(copy);
        assert_eq!(pool.stashed(), 0);
        assert_eq!(&hello[..], b"hello");
        drop(hello);
        assert_eq!(pool.stashed(), 1);
    }

    #[test]
    fn stash_respects_limit() {
        let pool = BufferPool::new(16, 1);
        let pages = (0 .. 3).map(|_| pool.checkout()).collect::<Vec<_>>();
        drop(pages);
        assert_eq!(pool.stashed(), 1);
    }

    #[test]
    fn oversized_pages_are_not_stashed() {
        let pool = BufferPool::new(16, 4);
        let mut page = pool.checkout_at_least(100);
        page.write_all(&[7u8; 100]).unwrap();
        drop(page.freeze());
        assert_eq!(pool.stashed(), 0);
    }

    #[test]
    fn slices_reject_out_of_range() {
        let bytes = Bytes::from_vec(vec![0u8; 10]);
        assert!(bytes.slice(5 .. 11).is_none());
        assert!(bytes.slice(5 .. 10).is_some());
    }

    #[test]
    fn pages_outlive_pool() {
        let pool = BufferPool::new(16, 4);
        let page = pool.checkout();
        drop(pool);
        drop(page.freeze());
    }
}
